use crate::command::{self, Command, MAX_RESPONSE_LENGTH};
use crate::error::{Error, Result};
use crate::session::{Delay, Session};
use tracing::debug;

/// Executes single command/response transactions over a [`Session`].
///
/// [`Session`]: trait.Session.html
pub struct Engine<S: Session> {
    session: S,
}

impl<S: Session> Engine<S> {
    pub fn new(session: S) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn into_session(self) -> S {
        self.session
    }

    /// Sends a command and returns at most `capacity` bytes of the response following the echo.
    pub fn execute(&mut self, command: Command, payload: &[u8], capacity: usize) -> Result<Vec<u8>> {
        self.execute_raw(command.into(), payload, capacity)
    }

    /// Like [`execute`], for an arbitrary command byte.
    ///
    /// [`execute`]: #method.execute
    pub fn execute_raw(&mut self, opcode: u8, payload: &[u8], capacity: usize) -> Result<Vec<u8>> {
        let frame = command::frame(opcode, payload)?;
        self.session.send(&frame)?;

        self.session.pause(Delay::Settle);

        let mut buffer = [0u8; MAX_RESPONSE_LENGTH];
        let received = self.session.receive(&mut buffer)?.min(buffer.len());
        if received == 0 {
            return Err(Error::NoResponse { opcode });
        }

        if buffer[0] != opcode {
            return Err(Error::EchoMismatch {
                expected: opcode,
                actual: buffer[0],
            });
        }

        let data = &buffer[1..received];
        let data = &data[..data.len().min(capacity)];
        debug!(
            opcode = %format!("0x{:02x}", opcode),
            sent = payload.len(),
            received = data.len(),
            "Transaction complete"
        );
        Ok(data.to_vec())
    }

    /// Blocks for one of the device's fixed delays.
    pub fn pause(&mut self, delay: Delay) {
        self.session.pause(delay);
    }
}
