
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use cartlink_core::DeviceError;

use crate::wire::Wire;

/// A reply queued for the scripted wire.
pub enum Reply {
    Data(Vec<u8>),
    Lost,
}

#[derive(Default)]
pub struct Script {
    pub written: Vec<Vec<u8>>,
    pub replies: VecDeque<Reply>,
    /// Served once the queue is empty, one millisecond apart, mimicking a
    /// device that keeps answering the same thing.
    pub repeat: Option<Vec<u8>>,
}

/// In-memory [`Wire`] that records every write and serves queued replies
/// byte-wise across read boundaries. An empty reply queue times out,
/// mimicking a silent device.
#[derive(Clone)]
pub struct ScriptedWire {
    pub script: Arc<Mutex<Script>>,
}

impl ScriptedWire {
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(Script::default())),
        }
    }

    pub fn queue(&self, data: Vec<u8>) {
        self.script
            .lock()
            .unwrap()
            .replies
            .push_back(Reply::Data(data));
    }

    pub fn queue_lost(&self) {
        self.script.lock().unwrap().replies.push_back(Reply::Lost);
    }

    pub fn set_repeat(&self, data: Vec<u8>) {
        self.script.lock().unwrap().repeat = Some(data);
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.script.lock().unwrap().written.clone()
    }
}

impl Wire for ScriptedWire {
    fn write_all(&mut self, buf: &[u8], _deadline: Instant) -> Result<(), DeviceError> {
        self.script.lock().unwrap().written.push(buf.to_vec());
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8], _deadline: Instant) -> Result<(), DeviceError> {
        let mut script = self.script.lock().unwrap();
        let mut filled = 0;
        while filled < buf.len() {
            if script.replies.is_empty() {
                match script.repeat.clone() {
                    Some(repeat) => {
                        std::thread::sleep(std::time::Duration::from_millis(1));
                        script.replies.push_back(Reply::Data(repeat));
                    }
                    None => return Err(DeviceError::Timeout),
                }
            }
            match script.replies.front_mut() {
                None => return Err(DeviceError::Timeout),
                Some(Reply::Lost) => {
                    script.replies.pop_front();
                    return Err(DeviceError::lost("scripted connection loss"));
                }
                Some(Reply::Data(data)) => {
                    let n = data.len().min(buf.len() - filled);
                    buf[filled..filled + n].copy_from_slice(&data[..n]);
                    data.drain(..n);
                    if data.is_empty() {
                        script.replies.pop_front();
                    }
                    filled += n;
                }
            }
        }
        Ok(())
    }
}
