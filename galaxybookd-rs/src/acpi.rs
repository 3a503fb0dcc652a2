/* Firmware method transport.
 *
 * All firmware I/O goes through the `AcpiMethods` trait so that the
 * protocol code never touches the kernel interface directly. The production
 * backend, `AcpiCallIo`, drives the `acpi_call` module: a request line is
 * written to `/proc/acpi/call` and the textual result is read back. */

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

/* Default location of the acpi_call control file */
pub const ACPI_CALL_PATH: &str = "/proc/acpi/call";

/* The acpi_call module never produces more result text than this */
const MAX_RESULT_LEN: u64 = 4096;

/* Status string the firmware reports for a pathname that does not exist */
const STATUS_NOT_FOUND: &str = "AE_NOT_FOUND";

#[derive(Debug, Error)]
pub enum AcpiError {
    #[error("I/O on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("firmware returned status {0}")]
    Status(String),

    #[error("method was not called")]
    NotCalled,

    #[error("cannot parse firmware result at offset {offset}: {message}")]
    Parse { offset: usize, message: String },
}

/* A value returned by a firmware method. */
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcpiObject {
    Integer(u64),
    String(String),
    Buffer(Vec<u8>),
    Package(Vec<AcpiObject>),
}

impl AcpiObject {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Integer(_) => "integer",
            Self::String(_) => "string",
            Self::Buffer(_) => "buffer",
            Self::Package(_) => "package",
        }
    }

    pub fn as_integer(&self) -> Option<u64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }
}

/* An argument passed to a firmware method. */
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcpiArg {
    Integer(u64),
    Buffer(Vec<u8>),
}

impl fmt::Display for AcpiArg {
    /* Encode in the acpi_call argument syntax: `0x..` or `b<hex>`. */
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "0x{v:x}"),
            Self::Buffer(bytes) => {
                f.write_str("b")?;
                for b in bytes {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
        }
    }
}

/* The firmware call mechanism underneath the method invoker. */
/*  */
/* Pathnames starting with `\` are absolute; anything else is resolved */
/* relative to the device the backend is bound to. */
#[async_trait]
pub trait AcpiMethods: Send {
    /* Evaluate one firmware method and return its result object. */
    async fn evaluate(&mut self, pathname: &str, args: &[AcpiArg]) -> Result<AcpiObject, AcpiError>;

    /* Whether a method exists. Only use this on methods that are safe to */
    /* evaluate without arguments. */
    async fn has_method(&mut self, pathname: &str) -> bool {
        match self.evaluate(pathname, &[]).await {
            Ok(_) => true,
            Err(AcpiError::Status(status)) => status != STATUS_NOT_FOUND,
            Err(_) => false,
        }
    }
}

/* Backend driving the `acpi_call` kernel module. */
pub struct AcpiCallIo {
    call_path: PathBuf,
    device_path: String,
}

impl AcpiCallIo {
    /* Bind to the firmware device at `device_path` (e.g. `\_SB.PC00.LPCB.SAM0`). */
    pub fn new(call_path: &Path, device_path: &str) -> Self {
        Self {
            call_path: call_path.to_path_buf(),
            device_path: device_path.trim_end_matches('.').to_string(),
        }
    }

    fn resolve(&self, pathname: &str) -> String {
        if pathname.starts_with('\\') {
            pathname.to_string()
        } else {
            format!("{}.{}", self.device_path, pathname)
        }
    }

    /* Build the line written to the acpi_call control file. */
    fn request_line(&self, pathname: &str, args: &[AcpiArg]) -> String {
        let mut line = self.resolve(pathname);
        for arg in args {
            line.push(' ');
            line.push_str(&arg.to_string());
        }
        line
    }

    fn io_error(&self, source: std::io::Error) -> AcpiError {
        AcpiError::Io {
            path: self.call_path.clone(),
            source,
        }
    }
}

#[async_trait]
impl AcpiMethods for AcpiCallIo {
    async fn evaluate(&mut self, pathname: &str, args: &[AcpiArg]) -> Result<AcpiObject, AcpiError> {
        let line = self.request_line(pathname, args);

        {
            let mut file = tokio::fs::OpenOptions::new()
                .write(true)
                .open(&self.call_path)
                .await
                .map_err(|e| self.io_error(e))?;
            file.write_all(line.as_bytes())
                .await
                .map_err(|e| self.io_error(e))?;
        }

        let file = tokio::fs::File::open(&self.call_path)
            .await
            .map_err(|e| self.io_error(e))?;
        let mut text = String::new();
        file.take(MAX_RESULT_LEN)
            .read_to_string(&mut text)
            .await
            .map_err(|e| self.io_error(e))?;

        debug!("acpi_call {line} -> {}", text.trim_end_matches(['\0', '\n']));
        parse_result(&text)
    }
}

/* Parse the textual result produced by acpi_call. */
/*  */
/* Grammar: `0x1f` integers, `"text"` strings, `{0x01, 0x02}` buffers, */
/* `[obj, obj]` packages, `Error: AE_...` failures and `not called`. */
pub fn parse_result(text: &str) -> Result<AcpiObject, AcpiError> {
    let text = text.trim_end_matches('\0').trim();

    if let Some(status) = text.strip_prefix("Error:") {
        return Err(AcpiError::Status(status.trim().to_string()));
    }
    if text == "not called" {
        return Err(AcpiError::NotCalled);
    }

    let mut parser = ResultParser {
        text: text.as_bytes(),
        pos: 0,
    };
    let object = parser.object()?;
    parser.skip_ws();
    if parser.pos != parser.text.len() {
        return Err(parser.error("trailing data after result"));
    }
    Ok(object)
}

struct ResultParser<'a> {
    text: &'a [u8],
    pos: usize,
}

impl ResultParser<'_> {
    fn error(&self, message: &str) -> AcpiError {
        AcpiError::Parse {
            offset: self.pos,
            message: message.to_string(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.text.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn object(&mut self) -> Result<AcpiObject, AcpiError> {
        self.skip_ws();
        match self.peek() {
            Some(b'{') => {
                let values = self.list(b'}', |p| p.integer())?;
                let bytes = values
                    .into_iter()
                    .map(|v| u8::try_from(v).map_err(|_| self.error("buffer byte out of range")))
                    .collect::<Result<Vec<u8>, _>>()?;
                Ok(AcpiObject::Buffer(bytes))
            }
            Some(b'[') => Ok(AcpiObject::Package(self.list(b']', |p| p.object())?)),
            Some(b'"') => {
                self.pos += 1;
                let start = self.pos;
                while self.peek().is_some_and(|c| c != b'"') {
                    self.pos += 1;
                }
                if self.peek().is_none() {
                    return Err(self.error("unterminated string"));
                }
                let s = String::from_utf8_lossy(&self.text[start..self.pos]).into_owned();
                self.pos += 1;
                Ok(AcpiObject::String(s))
            }
            Some(_) => Ok(AcpiObject::Integer(self.integer()?)),
            None => Err(self.error("unexpected end of result")),
        }
    }

    /* Parse a comma-separated list after the opening delimiter. */
    fn list<T>(
        &mut self,
        close: u8,
        mut element: impl FnMut(&mut Self) -> Result<T, AcpiError>,
    ) -> Result<Vec<T>, AcpiError> {
        self.pos += 1;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(close) {
                self.pos += 1;
                return Ok(items);
            }
            items.push(element(self)?);
            self.skip_ws();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(c) if c == close => {}
                _ => return Err(self.error("expected separator")),
            }
        }
    }

    fn integer(&mut self) -> Result<u64, AcpiError> {
        self.skip_ws();
        let rest = &self.text[self.pos..];
        if !(rest.starts_with(b"0x") || rest.starts_with(b"0X")) {
            return Err(self.error("expected hex integer"));
        }
        self.pos += 2;
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
            self.pos += 1;
        }
        let digits = std::str::from_utf8(&self.text[start..self.pos])
            .map_err(|_| self.error("invalid integer"))?;
        u64::from_str_radix(digits, 16).map_err(|_| self.error("invalid integer"))
    }
}

/* Backend replaying canned results, for exercising the protocol layers. */

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_integer() {
        assert_eq!(parse_result("0x2a\n").unwrap(), AcpiObject::Integer(0x2a));
    }

    #[test]
    fn test_parse_buffer_with_trailing_nul() {
        let obj = parse_result("{0x43, 0x58, 0x78, 0x00, 0xaa}\0").unwrap();
        assert_eq!(obj, AcpiObject::Buffer(vec![0x43, 0x58, 0x78, 0x00, 0xaa]));
    }

    #[test]
    fn test_parse_empty_buffer() {
        assert_eq!(parse_result("{}").unwrap(), AcpiObject::Buffer(Vec::new()));
    }

    #[test]
    fn test_parse_nested_package() {
        let obj = parse_result("[0x0, [0xaf0, \"FAN0\"], {0x01}]").unwrap();
        assert_eq!(
            obj,
            AcpiObject::Package(vec![
                AcpiObject::Integer(0),
                AcpiObject::Package(vec![
                    AcpiObject::Integer(0xaf0),
                    AcpiObject::String("FAN0".to_string()),
                ]),
                AcpiObject::Buffer(vec![0x01]),
            ])
        );
    }

    #[test]
    fn test_parse_error_status() {
        match parse_result("Error: AE_NOT_FOUND") {
            Err(AcpiError::Status(s)) => assert_eq!(s, "AE_NOT_FOUND"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_parse_not_called() {
        assert!(matches!(parse_result("not called"), Err(AcpiError::NotCalled)));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(parse_result("{0x01 0x02}"), Err(AcpiError::Parse { .. })));
        assert!(matches!(parse_result("{0x100}"), Err(AcpiError::Parse { .. })));
        assert!(matches!(parse_result("0x1 0x2"), Err(AcpiError::Parse { .. })));
        assert!(matches!(parse_result(""), Err(AcpiError::Parse { .. })));
    }

    #[test]
    fn test_request_line_resolves_relative_paths() {
        let io = AcpiCallIo::new(Path::new(ACPI_CALL_PATH), "\\_SB.PC00.LPCB.SAM0");
        assert_eq!(
            io.request_line("CSFI", &[AcpiArg::Buffer(vec![0x43, 0x58, 0x0a])]),
            "\\_SB.PC00.LPCB.SAM0.CSFI b43580a"
        );
        assert_eq!(
            io.request_line("\\_SB.PC00.LPCB.H_EC.FANS", &[]),
            "\\_SB.PC00.LPCB.H_EC.FANS"
        );
        assert_eq!(
            io.request_line("SDLS", &[AcpiArg::Integer(1)]),
            "\\_SB.PC00.LPCB.SAM0.SDLS 0x1"
        );
    }
}
