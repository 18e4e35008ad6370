use log::{info, trace};

/// Low-level channel driver.
///
/// Implement this for the PWM hardware of a device. The effect engine is
/// generic over it and only calls `write` when the output changes.
pub trait ChannelDriver {
    /// Write one value per channel, already clamped to the device resolution
    fn write(&mut self, values: &[u16]);
}

/// Driver that logs every write, used on hosts without PWM hardware.
#[derive(Debug, Default)]
pub struct LogDriver {
    writes: u64,
}

impl LogDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> u64 {
        self.writes
    }
}

impl ChannelDriver for LogDriver {
    fn write(&mut self, values: &[u16]) {
        self.writes += 1;
        trace!("Channels: {:?}", values);
    }
}

/// Driver that remembers everything written, for tests and simulations.
#[derive(Debug, Default, Clone)]
pub struct RecordingDriver {
    pub history: Vec<Vec<u16>>,
}

impl RecordingDriver {
    pub fn last(&self) -> Option<&[u16]> {
        self.history.last().map(Vec::as_slice)
    }
}

impl ChannelDriver for RecordingDriver {
    fn write(&mut self, values: &[u16]) {
        self.history.push(values.to_vec());
    }
}

/// Process-level services that the core cannot provide itself.
pub trait Platform {
    /// Hard restart of the device. Never returns.
    fn restart(&mut self) -> !;
}

/// Host platform: a restart exits the process so a supervisor can start it
/// again.
#[derive(Debug, Default)]
pub struct HostPlatform;

impl Platform for HostPlatform {
    fn restart(&mut self) -> ! {
        info!("Resetting");
        std::process::exit(0)
    }
}
