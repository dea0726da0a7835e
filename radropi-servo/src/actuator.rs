//! Actuator abstraction over the servo driver board

use crate::config::Axis;
use crate::error::ServoError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

/// Absolute per-axis position writes
#[async_trait]
pub trait Actuator: Send {
    fn name(&self) -> &str;

    async fn connect(&mut self) -> Result<(), ServoError>;

    /// Move `axis` to `angle_deg`. Bounds are enforced by the caller.
    async fn write(&mut self, axis: Axis, angle_deg: f32) -> Result<(), ServoError>;

    async fn disconnect(&mut self) -> Result<(), ServoError>;

    fn is_connected(&self) -> bool;
}

#[derive(Debug, Default)]
struct MockState {
    writes: Vec<(Axis, f32)>,
    fail_next: u32,
    always_fail: bool,
    stall: bool,
    connected: bool,
    connect_fails: bool,
}

/// Test-side view of a [`MockActuator`]: inspect writes and inject faults
#[derive(Debug, Clone, Default)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    /// Every successful write, in order
    pub fn writes(&self) -> Vec<(Axis, f32)> {
        self.state.lock().writes.clone()
    }

    pub fn writes_for(&self, axis: Axis) -> Vec<f32> {
        self.state
            .lock()
            .writes
            .iter()
            .filter(|(a, _)| *a == axis)
            .map(|(_, angle)| *angle)
            .collect()
    }

    pub fn clear(&self) {
        self.state.lock().writes.clear();
    }

    /// Fail the next `count` writes with a communication error
    pub fn fail_next(&self, count: u32) {
        self.state.lock().fail_next = count;
    }

    pub fn set_always_fail(&self, fail: bool) {
        self.state.lock().always_fail = fail;
    }

    /// Writes never complete; only the caller's timeout ends them
    pub fn set_stall(&self, stall: bool) {
        self.state.lock().stall = stall;
    }

    pub fn set_connect_fails(&self, fail: bool) {
        self.state.lock().connect_fails = fail;
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }
}

/// In-memory actuator that records writes
#[derive(Debug, Default)]
pub struct MockActuator {
    handle: MockHandle,
}

impl MockActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> MockHandle {
        self.handle.clone()
    }
}

#[async_trait]
impl Actuator for MockActuator {
    fn name(&self) -> &str {
        "mock"
    }

    async fn connect(&mut self) -> Result<(), ServoError> {
        let mut state = self.handle.state.lock();
        if state.connect_fails {
            return Err(ServoError::Communication("Mock driver board absent".to_string()));
        }
        state.connected = true;
        info!("Mock servo actuator connected");
        Ok(())
    }

    async fn write(&mut self, axis: Axis, angle_deg: f32) -> Result<(), ServoError> {
        let stall = {
            let mut state = self.handle.state.lock();
            if !state.connected {
                return Err(ServoError::NotInitialized);
            }
            if state.always_fail {
                return Err(ServoError::Communication(format!("Injected failure on {}", axis)));
            }
            if state.fail_next > 0 {
                state.fail_next -= 1;
                return Err(ServoError::Communication(format!("Injected failure on {}", axis)));
            }
            if !state.stall {
                state.writes.push((axis, angle_deg));
            }
            state.stall
        };
        if stall {
            std::future::pending::<()>().await;
        }
        debug!("Mock write {} -> {:.2}", axis, angle_deg);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ServoError> {
        self.handle.state.lock().connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.handle.is_connected()
    }
}

/// Driver board on a serial line, speaking `S <channel> <angle>\n`
#[cfg(feature = "serial")]
pub struct SerialActuator {
    port_name: String,
    baud_rate: u32,
    timeout: std::time::Duration,
    port: Option<Arc<Mutex<Box<dyn serialport::SerialPort>>>>,
}

#[cfg(feature = "serial")]
impl SerialActuator {
    pub fn new(port_name: impl Into<String>, baud_rate: u32, timeout: std::time::Duration) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            timeout,
            port: None,
        }
    }
}

/// Wire format of one position command
pub fn encode_command(axis: Axis, angle_deg: f32) -> String {
    format!("S {} {:.1}\n", axis.channel(), angle_deg)
}

#[cfg(feature = "serial")]
#[async_trait]
impl Actuator for SerialActuator {
    fn name(&self) -> &str {
        &self.port_name
    }

    async fn connect(&mut self) -> Result<(), ServoError> {
        let port = serialport::new(&self.port_name, self.baud_rate)
            .timeout(self.timeout)
            .open()
            .map_err(|e| ServoError::Communication(format!("Failed to open {}: {}", self.port_name, e)))?;
        self.port = Some(Arc::new(Mutex::new(port)));
        info!("Servo driver connected on {} @ {} baud", self.port_name, self.baud_rate);
        Ok(())
    }

    async fn write(&mut self, axis: Axis, angle_deg: f32) -> Result<(), ServoError> {
        let port = self.port.clone().ok_or(ServoError::NotInitialized)?;
        let line = encode_command(axis, angle_deg);
        tokio::task::spawn_blocking(move || {
            use std::io::Write;
            let mut port = port.lock();
            port.write_all(line.as_bytes())?;
            port.flush()
        })
        .await
        .map_err(|e| ServoError::Communication(format!("Serial write task failed: {}", e)))?
        .map_err(|e| ServoError::Communication(format!("Serial write failed: {}", e)))
    }

    async fn disconnect(&mut self) -> Result<(), ServoError> {
        if self.port.take().is_some() {
            info!("Servo driver on {} released", self.port_name);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }
}
