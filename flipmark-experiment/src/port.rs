//! Digital output ports: legacy parallel port, serial trigger box, and an
//! in-memory port for dry runs.

use crate::backend::OutputPort;
use crate::error::PortError;
use flipmark_core::TriggerWord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_PARALLEL_ADDRESS: u16 = 0x378;
pub const DEFAULT_BAUD: u32 = 9600;

/// Where trigger words go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum PortSpec {
    Memory,
    Parallel { address: u16 },
    Serial { path: String, baud: u32 },
}

impl Default for PortSpec {
    fn default() -> Self {
        PortSpec::Parallel {
            address: DEFAULT_PARALLEL_ADDRESS,
        }
    }
}

impl PortSpec {
    /// Opens the port for words of `width` bits.
    pub fn open(&self, width: usize) -> Result<Box<dyn OutputPort>, PortError> {
        let port: Box<dyn OutputPort> = match self {
            PortSpec::Memory => Box::new(MemoryPort::new(width)),
            PortSpec::Parallel { address } => Box::new(ParallelPort::open(*address, width)?),
            PortSpec::Serial { path, baud } => Box::new(SerialPort::open(path, *baud, width)?),
        };
        tracing::info!(port = %port.describe(), width, "output port opened");
        Ok(port)
    }
}

fn parse_address(s: &str) -> Option<u16> {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

impl FromStr for PortSpec {
    type Err = PortError;

    /// `memory`, `parallel`, `parallel:0x378`, a bare address such as
    /// `0x378`, `serial:/dev/ttyUSB0` or `serial:COM3@115200`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PortError::InvalidSpec(s.to_string());
        let (kind, rest) = match s.split_once(':') {
            Some((kind, rest)) => (kind, Some(rest)),
            None => (s, None),
        };
        match (kind.trim().to_ascii_lowercase().as_str(), rest) {
            ("memory" | "none", None) => Ok(PortSpec::Memory),
            ("parallel", None) => Ok(PortSpec::default()),
            ("parallel", Some(addr)) => parse_address(addr)
                .map(|address| PortSpec::Parallel { address })
                .ok_or_else(invalid),
            ("serial", Some(target)) if !target.is_empty() => {
                let (path, baud) = match target.rsplit_once('@') {
                    Some((path, baud)) => (path, baud.parse().map_err(|_| invalid())?),
                    None => (target, DEFAULT_BAUD),
                };
                Ok(PortSpec::Serial {
                    path: path.to_string(),
                    baud,
                })
            }
            (_, None) => parse_address(s)
                .map(|address| PortSpec::Parallel { address })
                .ok_or_else(invalid),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortSpec::Memory => write!(f, "memory"),
            PortSpec::Parallel { address } => write!(f, "parallel:0x{address:x}"),
            PortSpec::Serial { path, baud } => write!(f, "serial:{path}@{baud}"),
        }
    }
}

fn check_byte_width(target: &str, width: usize) -> Result<(), PortError> {
    if width > 8 {
        return Err(PortError::WordTooWide {
            target: target.to_string(),
            width,
            max: 8,
        });
    }
    Ok(())
}

/// Records applied words. Selected writes can be made to fail.
#[derive(Debug, Clone, Default)]
pub struct MemoryPort {
    width: usize,
    writes: Vec<TriggerWord>,
    attempts: usize,
    fail_on: BTreeSet<usize>,
}

impl MemoryPort {
    pub fn new(width: usize) -> Self {
        Self {
            width,
            ..Self::default()
        }
    }

    /// Makes the `n`th write attempt (0-based) fail.
    pub fn fail_on_write(mut self, n: usize) -> Self {
        self.fail_on.insert(n);
        self
    }

    /// Successfully applied words, in order.
    pub fn writes(&self) -> &[TriggerWord] {
        &self.writes
    }

    pub fn values(&self) -> Vec<u32> {
        self.writes.iter().map(TriggerWord::value).collect()
    }

    pub fn last(&self) -> Option<TriggerWord> {
        self.writes.last().copied()
    }

    pub fn attempts(&self) -> usize {
        self.attempts
    }
}

impl OutputPort for MemoryPort {
    fn write_word(&mut self, word: TriggerWord) -> Result<(), PortError> {
        let attempt = self.attempts;
        self.attempts += 1;
        if self.fail_on.contains(&attempt) {
            return Err(PortError::Rejected(attempt));
        }
        self.writes.push(word);
        Ok(())
    }

    fn describe(&self) -> String {
        format!("memory ({} bits)", self.width)
    }
}

/// Legacy PC parallel port. Written through `/dev/port` on Linux and through
/// the inpout driver (`inpoutx64.dll` or `inpout32.dll`) on Windows.
pub struct ParallelPort {
    address: u16,
    driver: ParallelDriver,
}

#[cfg(target_os = "linux")]
struct ParallelDriver(std::fs::File);

#[cfg(windows)]
struct ParallelDriver(inpout::Driver);

#[cfg(not(any(target_os = "linux", windows)))]
enum ParallelDriver {}

impl ParallelPort {
    pub fn open(address: u16, width: usize) -> Result<Self, PortError> {
        let target = format!("parallel:0x{address:x}");
        check_byte_width(&target, width)?;
        let driver = ParallelDriver::open().map_err(|source| PortError::Open { target, source })?;
        Ok(Self { address, driver })
    }

    pub fn address(&self) -> u16 {
        self.address
    }
}

impl ParallelDriver {
    #[cfg(target_os = "linux")]
    fn open() -> std::io::Result<Self> {
        std::fs::OpenOptions::new()
            .write(true)
            .open("/dev/port")
            .map(ParallelDriver)
    }

    #[cfg(windows)]
    fn open() -> std::io::Result<Self> {
        inpout::Driver::load().map(ParallelDriver)
    }

    #[cfg(not(any(target_os = "linux", windows)))]
    fn open() -> std::io::Result<Self> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "no parallel port driver on this platform",
        ))
    }

    #[cfg(target_os = "linux")]
    fn write(&mut self, address: u16, value: u8) -> std::io::Result<()> {
        use std::os::unix::fs::FileExt;
        self.0.write_all_at(&[value], u64::from(address))
    }

    #[cfg(windows)]
    fn write(&mut self, address: u16, value: u8) -> std::io::Result<()> {
        self.0.write(address, value);
        Ok(())
    }

    #[cfg(not(any(target_os = "linux", windows)))]
    fn write(&mut self, _address: u16, _value: u8) -> std::io::Result<()> {
        match *self {}
    }
}

impl OutputPort for ParallelPort {
    fn write_word(&mut self, word: TriggerWord) -> Result<(), PortError> {
        self.driver
            .write(self.address, word.low_byte())
            .map_err(|source| PortError::Write {
                target: self.describe(),
                source,
            })
    }

    fn describe(&self) -> String {
        format!("parallel:0x{:x}", self.address)
    }
}

#[cfg(windows)]
mod inpout {
    use std::io;
    use windows::Win32::System::LibraryLoader::{GetProcAddress, LoadLibraryW};
    use windows::core::{s, w};

    type Out32 = unsafe extern "system" fn(i16, i16);
    type IsInpOutDriverOpen = unsafe extern "system" fn() -> i32;

    /// Port I/O through the inpout kernel driver. The library stays loaded
    /// for the life of the process.
    pub struct Driver {
        out32: Out32,
    }

    impl Driver {
        pub fn load() -> io::Result<Self> {
            let module = unsafe { LoadLibraryW(w!("inpoutx64.dll")) }
                .or_else(|_| unsafe { LoadLibraryW(w!("inpout32.dll")) })
                .map_err(|err| io::Error::new(io::ErrorKind::NotFound, format!("inpout library: {err}")))?;

            let out32 = unsafe { GetProcAddress(module, s!("Out32")) }
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "inpout library has no Out32"))?;
            if let Some(is_open) = unsafe { GetProcAddress(module, s!("IsInpOutDriverOpen")) } {
                let is_open: IsInpOutDriverOpen = unsafe { std::mem::transmute(is_open) };
                if unsafe { is_open() } == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::PermissionDenied,
                        "inpout driver is not running",
                    ));
                }
            }
            Ok(Self {
                out32: unsafe { std::mem::transmute::<_, Out32>(out32) },
            })
        }

        pub fn write(&self, address: u16, value: u8) {
            unsafe { (self.out32)(address as i16, i16::from(value)) }
        }
    }
}

/// Baud rates the serial backends can configure.
pub const SERIAL_BAUDS: [u32; 8] = [1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200];

/// Serial trigger interface: one byte per word, raw 8N1.
pub struct SerialPort {
    path: String,
    baud: u32,
    file: std::fs::File,
}

impl SerialPort {
    pub fn open(path: &str, baud: u32, width: usize) -> Result<Self, PortError> {
        let target = format!("serial:{path}@{baud}");
        check_byte_width(&target, width)?;
        if !SERIAL_BAUDS.contains(&baud) {
            return Err(PortError::InvalidBaud(baud));
        }
        if cfg!(not(any(unix, windows))) {
            return Err(PortError::Unsupported("serial"));
        }

        let mut options = std::fs::OpenOptions::new();
        options.write(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.custom_flags(libc::O_NOCTTY);
        }
        #[cfg(windows)]
        options.read(true);
        let file = options
            .open(device_path(path))
            .map_err(|source| PortError::Open {
                target: target.clone(),
                source,
            })?;

        #[cfg(any(unix, windows))]
        configure_raw(&file, baud).map_err(|err| match err {
            RawError::Baud => PortError::InvalidBaud(baud),
            RawError::Io(source) => PortError::Open { target, source },
        })?;

        Ok(Self {
            path: path.to_string(),
            baud,
            file,
        })
    }
}

impl OutputPort for SerialPort {
    fn write_word(&mut self, word: TriggerWord) -> Result<(), PortError> {
        use std::io::Write;
        self.file
            .write_all(&[word.low_byte()])
            .and_then(|()| self.file.flush())
            .map_err(|source| PortError::Write {
                target: format!("serial:{}@{}", self.path, self.baud),
                source,
            })
    }

    fn describe(&self) -> String {
        format!("serial:{}@{}", self.path, self.baud)
    }
}

/// `COM10` and above only open through the `\\.\` device namespace.
fn device_path(path: &str) -> String {
    let is_com = path
        .get(..3)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("com"))
        && path.len() > 3
        && path[3..].bytes().all(|b| b.is_ascii_digit());
    if cfg!(windows) && is_com {
        format!(r"\\.\{path}")
    } else {
        path.to_string()
    }
}

#[cfg(any(unix, windows))]
enum RawError {
    #[cfg_attr(windows, allow(dead_code))]
    Baud,
    Io(std::io::Error),
}

/// Raw 8N1 at `baud`, no flow control.
#[cfg(unix)]
fn configure_raw(file: &std::fs::File, baud: u32) -> Result<(), RawError> {
    use std::os::unix::io::AsRawFd;

    let speed = match baud {
        1200 => libc::B1200,
        2400 => libc::B2400,
        4800 => libc::B4800,
        9600 => libc::B9600,
        19200 => libc::B19200,
        38400 => libc::B38400,
        57600 => libc::B57600,
        115200 => libc::B115200,
        _ => return Err(RawError::Baud),
    };
    let fd = file.as_raw_fd();
    unsafe {
        let mut tio: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(fd, &mut tio) != 0 {
            return Err(RawError::Io(std::io::Error::last_os_error()));
        }
        libc::cfmakeraw(&mut tio);
        tio.c_cflag |= libc::CLOCAL | libc::CREAD;
        tio.c_cflag &= !(libc::CSTOPB | libc::PARENB);
        if libc::cfsetospeed(&mut tio, speed) != 0 || libc::cfsetispeed(&mut tio, speed) != 0 {
            return Err(RawError::Io(std::io::Error::last_os_error()));
        }
        if libc::tcsetattr(fd, libc::TCSANOW, &tio) != 0 {
            return Err(RawError::Io(std::io::Error::last_os_error()));
        }
    }
    Ok(())
}

/// Raw 8N1 at `baud`, no flow control.
#[cfg(windows)]
fn configure_raw(file: &std::fs::File, baud: u32) -> Result<(), RawError> {
    use std::os::windows::io::AsRawHandle;
    use windows::Win32::Devices::Communication::{
        DCB, GetCommState, NOPARITY, ONESTOPBIT, SetCommState,
    };
    use windows::Win32::Foundation::HANDLE;

    let io = |err: windows::core::Error| RawError::Io(std::io::Error::other(err.to_string()));
    let handle = HANDLE(file.as_raw_handle());
    let mut dcb = DCB {
        DCBlength: std::mem::size_of::<DCB>() as u32,
        ..Default::default()
    };
    unsafe { GetCommState(handle, &mut dcb) }.map_err(io)?;
    dcb.BaudRate = baud;
    dcb.ByteSize = 8;
    dcb.Parity = NOPARITY;
    dcb.StopBits = ONESTOPBIT;
    // fBinary set; parity checking and all flow control off
    dcb._bitfield = 1;
    unsafe { SetCommState(handle, &dcb) }.map_err(io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_port_specs() {
        assert_eq!("memory".parse::<PortSpec>().unwrap(), PortSpec::Memory);
        assert_eq!(
            "parallel".parse::<PortSpec>().unwrap(),
            PortSpec::Parallel { address: 0x378 }
        );
        assert_eq!(
            "0x3bc".parse::<PortSpec>().unwrap(),
            PortSpec::Parallel { address: 0x3bc }
        );
        assert_eq!(
            "parallel:888".parse::<PortSpec>().unwrap(),
            PortSpec::Parallel { address: 888 }
        );
        assert_eq!(
            "serial:/dev/ttyUSB0@115200".parse::<PortSpec>().unwrap(),
            PortSpec::Serial {
                path: "/dev/ttyUSB0".into(),
                baud: 115200
            }
        );
        assert_eq!(
            "serial:COM3".parse::<PortSpec>().unwrap(),
            PortSpec::Serial {
                path: "COM3".into(),
                baud: DEFAULT_BAUD
            }
        );
        assert!("serial:".parse::<PortSpec>().is_err());
        assert!("serial:/dev/x@fast".parse::<PortSpec>().is_err());
        assert!("usb".parse::<PortSpec>().is_err());
    }

    #[test]
    fn display_round_trips() {
        for spec in [
            PortSpec::Memory,
            PortSpec::Parallel { address: 0x378 },
            PortSpec::Serial {
                path: "/dev/ttyACM0".into(),
                baud: 9600,
            },
        ] {
            assert_eq!(spec.to_string().parse::<PortSpec>().unwrap(), spec);
        }
    }

    #[test]
    fn byte_ports_reject_wide_words() {
        assert!(matches!(
            SerialPort::open("/nonexistent/tty", 9600, 16),
            Err(PortError::WordTooWide { width: 16, max: 8, .. })
        ));
        assert!(matches!(
            SerialPort::open("/nonexistent/tty", 9600, 8),
            Err(PortError::Open { .. })
        ));
    }

    #[test]
    fn serial_rejects_baud_it_cannot_apply() {
        assert!(matches!(
            SerialPort::open("/nonexistent/tty", 12345, 8),
            Err(PortError::InvalidBaud(12345))
        ));
    }

    #[test]
    fn parallel_rejects_wide_words_before_touching_hardware() {
        assert!(matches!(
            ParallelPort::open(0x378, 16),
            Err(PortError::WordTooWide { width: 16, max: 8, .. })
        ));
    }

    #[cfg(not(any(target_os = "linux", windows)))]
    #[test]
    fn parallel_is_unavailable_without_a_driver() {
        let err = ParallelPort::open(0x378, 8).err().unwrap();
        match err {
            PortError::Open { source, .. } => {
                assert_eq!(source.kind(), std::io::ErrorKind::Unsupported)
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn high_com_ports_use_the_device_namespace() {
        if cfg!(windows) {
            assert_eq!(device_path("COM12"), r"\\.\COM12");
        } else {
            assert_eq!(device_path("COM12"), "COM12");
        }
        assert_eq!(device_path("/dev/ttyUSB0"), "/dev/ttyUSB0");
        assert_eq!(device_path("COMX"), "COMX");
    }

    #[test]
    fn memory_port_skips_rejected_writes() {
        let mut port = MemoryPort::new(8).fail_on_write(1);
        let zero = TriggerWord::zero(8).unwrap();
        port.write_word(zero).unwrap();
        assert!(matches!(port.write_word(zero), Err(PortError::Rejected(1))));
        port.write_word(zero).unwrap();
        assert_eq!(port.writes().len(), 2);
        assert_eq!(port.attempts(), 3);
    }
}
