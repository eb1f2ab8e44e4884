// I2C bus access for the follower board
//
// A bus is opened per transaction and released when the handle drops, so the
// device node is never held between commands and a failed write still closes it.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::fd::AsRawFd;
use std::path::PathBuf;

use embedded_hal::i2c::{Error as _, ErrorKind, I2c};
use tracing::{debug, trace};

/// I2C_SLAVE request from linux/i2c-dev.h
const I2C_SLAVE: u16 = 0x0703;

nix::ioctl_write_int_bad!(select_follower, I2C_SLAVE);

/// Error types for bus communication
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Failed to open bus {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to select follower 0x{address:02X}: {source}")]
    Select { address: u8, source: nix::Error },

    #[error("Write to follower 0x{address:02X} failed: {source}")]
    Write {
        address: u8,
        source: std::io::Error,
    },

    #[error("I2C error at follower 0x{address:02X}: {kind:?}")]
    Hal { address: u8, kind: ErrorKind },
}

/// An open bus, valid for one transaction
pub trait BusHandle {
    fn write_byte(&mut self, address: u8, byte: u8) -> Result<(), BusError>;
}

/// Something that can hand out exclusive bus handles
pub trait I2cBus: Send + 'static {
    type Handle<'a>: BusHandle
    where
        Self: 'a;

    fn open(&mut self) -> Result<Self::Handle<'_>, BusError>;
}

/// Acquire the bus, write every byte in order, release.
///
/// Stops at the first failing byte. The handle is dropped on every path.
pub fn write_message<B: I2cBus>(bus: &mut B, address: u8, bytes: &[u8]) -> Result<(), BusError> {
    let mut handle = bus.open()?;
    for &byte in bytes {
        handle.write_byte(address, byte)?;
        trace!("Sent 0x{:02X} to 0x{:02X}", byte, address);
    }
    Ok(())
}

/// Linux i2c-dev character device (e.g. /dev/i2c-1)
#[derive(Debug, Clone)]
pub struct LinuxI2cBus {
    path: PathBuf,
}

impl LinuxI2cBus {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

pub struct LinuxI2cHandle {
    file: File,
    selected: Option<u8>,
}

impl I2cBus for LinuxI2cBus {
    type Handle<'a> = LinuxI2cHandle;

    fn open(&mut self) -> Result<LinuxI2cHandle, BusError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|source| BusError::Open {
                path: self.path.clone(),
                source,
            })?;
        debug!("Opened {}", self.path.display());

        Ok(LinuxI2cHandle {
            file,
            selected: None,
        })
    }
}

impl BusHandle for LinuxI2cHandle {
    fn write_byte(&mut self, address: u8, byte: u8) -> Result<(), BusError> {
        if self.selected != Some(address) {
            // SAFETY: the fd belongs to an open i2c-dev node owned by this handle
            unsafe { select_follower(self.file.as_raw_fd(), i32::from(address)) }
                .map_err(|source| BusError::Select { address, source })?;
            self.selected = Some(address);
        }

        self.file
            .write_all(&[byte])
            .map_err(|source| BusError::Write { address, source })
    }
}

/// Adapter for any embedded-hal 1.0 I2C implementation
pub struct EmbeddedHalBus<I> {
    i2c: I,
}

impl<I> EmbeddedHalBus<I> {
    pub fn new(i2c: I) -> Self {
        Self { i2c }
    }

    pub fn into_inner(self) -> I {
        self.i2c
    }
}

pub struct EmbeddedHalHandle<'a, I> {
    i2c: &'a mut I,
}

impl<I: I2c + Send + 'static> I2cBus for EmbeddedHalBus<I> {
    type Handle<'a> = EmbeddedHalHandle<'a, I>;

    fn open(&mut self) -> Result<EmbeddedHalHandle<'_, I>, BusError> {
        Ok(EmbeddedHalHandle { i2c: &mut self.i2c })
    }
}

impl<I: I2c> BusHandle for EmbeddedHalHandle<'_, I> {
    fn write_byte(&mut self, address: u8, byte: u8) -> Result<(), BusError> {
        self.i2c.write(address, &[byte]).map_err(|e| BusError::Hal {
            address,
            kind: e.kind(),
        })
    }
}

/// Dry-run bus: traces the bytes instead of sending them
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingBus;

pub struct LoggingHandle;

impl I2cBus for LoggingBus {
    type Handle<'a> = LoggingHandle;

    fn open(&mut self) -> Result<LoggingHandle, BusError> {
        Ok(LoggingHandle)
    }
}

impl BusHandle for LoggingHandle {
    fn write_byte(&mut self, address: u8, byte: u8) -> Result<(), BusError> {
        debug!("[dry-run] 0x{:02X} <- 0x{:02X}", address, byte);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::i2c::{ErrorType, NoAcknowledgeSource, Operation};

    #[derive(Default)]
    struct FakeI2c {
        writes: Vec<(u8, Vec<u8>)>,
        fail_at: Option<usize>,
    }

    impl ErrorType for FakeI2c {
        type Error = ErrorKind;
    }

    impl I2c for FakeI2c {
        fn transaction(
            &mut self,
            address: u8,
            operations: &mut [Operation<'_>],
        ) -> Result<(), Self::Error> {
            for op in operations {
                if let Operation::Write(bytes) = op {
                    if self.fail_at == Some(self.writes.len()) {
                        return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data));
                    }
                    self.writes.push((address, bytes.to_vec()));
                }
            }
            Ok(())
        }
    }

    #[test]
    fn test_write_message_one_byte_per_transfer() {
        let mut bus = EmbeddedHalBus::new(FakeI2c::default());
        write_message(&mut bus, 0x23, &[0x01, 0xAC, 0x0D, 0x00, 0x00, 0x00]).unwrap();

        let fake = bus.into_inner();
        assert_eq!(fake.writes.len(), 6);
        assert!(fake.writes.iter().all(|(addr, bytes)| *addr == 0x23 && bytes.len() == 1));
        assert_eq!(fake.writes[1].1, vec![0xAC]);
    }

    #[test]
    fn test_write_message_stops_at_first_failure() {
        let mut bus = EmbeddedHalBus::new(FakeI2c {
            fail_at: Some(2),
            ..Default::default()
        });
        let err = write_message(&mut bus, 0x23, &[1, 2, 3, 4, 5, 6]).unwrap_err();

        assert!(matches!(
            err,
            BusError::Hal {
                address: 0x23,
                kind: ErrorKind::NoAcknowledge(_)
            }
        ));
        assert_eq!(bus.into_inner().writes.len(), 2);
    }

    #[test]
    fn test_linux_bus_missing_device() {
        let mut bus = LinuxI2cBus::new("/nonexistent/i2c-99");
        let err = write_message(&mut bus, 0x23, &[0x00]).unwrap_err();
        assert!(matches!(err, BusError::Open { .. }));
    }

    #[test]
    fn test_logging_bus_accepts_everything() {
        let mut bus = LoggingBus;
        assert!(write_message(&mut bus, 0x23, &[0xFF; 6]).is_ok());
    }
}
