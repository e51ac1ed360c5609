use pixelpen_common::{Command, FrameDecoder, Transport, TransportError};

/// Stands in for the serial port: checks every frame the way the firmware
/// would and logs what the strip would have done.
#[derive(Debug, Default)]
pub struct DryRunTransport {
    decoder: FrameDecoder,
    pending_pixels: usize,
    brightness: Option<u8>,
    shows: u64,
    closed: bool,
}

impl DryRunTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn apply(&mut self, command: Command) {
        trace!(?command, "decoded");
        match command {
            Command::SetPixel { .. } => self.pending_pixels += 1,
            Command::Brightness(value) => self.brightness = Some(value),
            Command::Show => {
                self.shows += 1;
                debug!(
                    show = self.shows,
                    pixels = self.pending_pixels,
                    brightness = ?self.brightness,
                    "latched"
                );
                self.pending_pixels = 0;
            }
        }
    }
}

impl Transport for DryRunTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }

        for command in self.decoder.feed_bytes(bytes)? {
            self.apply(command);
        }
        Ok(bytes.len())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if !self.closed {
            self.closed = true;
            info!(shows = self.shows, "dry run finished");
        }
        Ok(())
    }

    fn label(&self) -> &str {
        "dry-run"
    }
}
