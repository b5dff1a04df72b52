use std::sync::mpsc;

pub mod util;

pub trait EmulationCore {
    fn name(&self) -> &'static str;
    fn new_send(&self) -> Result<Box<dyn Instance + Send>, anyhow::Error>;

    fn new(&self) -> Result<Box<dyn Instance>, anyhow::Error> {
        Ok(self.new_send()?)
    }
}

pub enum UpdateMessage {
    Vsync,
}

#[derive(Debug)]
pub enum ControlMessage {
    Pause,
    Reset,
}

/// Synchronous instance of an emulator core
///
/// `run` owns the calling thread until it is paused over the control channel
/// or the instance reaches its configured stopping point.
pub trait Instance: Send {
    fn run(
        &mut self,
        control_rx: &mpsc::Receiver<ControlMessage>,
        update: mpsc::SyncSender<UpdateMessage>,
    ) -> Result<(), anyhow::Error>;

    fn as_any(&mut self) -> &mut dyn std::any::Any;
}
