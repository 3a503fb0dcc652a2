/* Samsung ACPI command buffer ("SAWB") definitions.
 *
 * Requests and responses for one call always have the same fixed length
 * and share a common header:
 *   [0..2] function id (u16 LE, always SAFN)
 *   [2..4] sub-feature id (u16 LE)
 *   [4]    result flag, set by the firmware in the response
 *
 * Two layouts follow the header:
 *   - settings (21 bytes):          [5] opcode, [6..] payload
 *   - performance mode (256 bytes): [5..21] capability GUID, [21] function,
 *                                   [22] sub-function, [23..33] data bytes */

use std::fmt;

/* Protocol family tag carried in every buffer */
pub const SAFN: u16 = 0x5843;

pub const SETTINGS_LEN: usize = 0x15;
pub const PERFORMANCE_MODE_LEN: usize = 0x100;

const SAFN_POS: usize = 0;
const SASB_POS: usize = 2;
pub const RFLG_POS: usize = 4;
pub const GUNM_POS: usize = 5;
const GUDS_POS: usize = 6;
const CAID_POS: usize = 5;
const FNCN_POS: usize = 21;
const SUBN_POS: usize = 22;
const IOB_POS: usize = 23;
pub const IOB_LEN: usize = 10;

/* Response sentinels */
pub const RFLG_SUCCESS: u8 = 0xaa;
pub const GUNM_FAIL: u8 = 0xff;

/* Sub-feature ids */
pub const SASB_KBD_BACKLIGHT: u16 = 0x78;
pub const SASB_POWER_MANAGEMENT: u16 = 0x7a;
pub const SASB_USB_CHARGE_GET: u16 = 0x67;
pub const SASB_USB_CHARGE_SET: u16 = 0x68;
pub const SASB_NOTIFICATIONS: u16 = 0x86;
pub const SASB_ALLOW_RECORDING: u16 = 0x8a;
pub const SASB_PERFORMANCE_MODE: u16 = 0x91;

/* Enable handshake markers */
pub const GUNM_FEATURE_ENABLE: u8 = 0xbb;
pub const GUNM_FEATURE_ENABLE_SUCCESS: u8 = 0xdd;
pub const GUDS_FEATURE_ENABLE: u8 = 0xaa;
pub const GUDS_FEATURE_ENABLE_SUCCESS: u8 = 0xcc;

/* Generic opcodes */
pub const GUNM_GET: u8 = 0x81;
pub const GUNM_SET: u8 = 0x82;

/* Power management */
pub const GUNM_POWER_MANAGEMENT: u8 = 0x82;
pub const GUDS_START_ON_LID_OPEN: u8 = 0xa3;
pub const GUDS_START_ON_LID_OPEN_GET: u8 = 0x81;
pub const GUDS_START_ON_LID_OPEN_SET: u8 = 0x80;
pub const GUDS_BATTERY_CHARGE_CONTROL: u8 = 0xe9;
pub const GUDS_BATTERY_CHARGE_CONTROL_GET: u8 = 0x91;
pub const GUDS_BATTERY_CHARGE_CONTROL_SET: u8 = 0x90;

/* USB charge */
pub const GUNM_USB_CHARGE_GET: u8 = 0x80;
pub const GUNM_USB_CHARGE_ON: u8 = 0x81;
pub const GUNM_USB_CHARGE_OFF: u8 = 0x80;

/* Notifications */
pub const GUNM_ACPI_NOTIFY_ENABLE: u8 = 0x80;
pub const GUDS_ACPI_NOTIFY_ENABLE: u8 = 0x02;

/* Performance mode capability: GUID 8246028d-8bca-4a55-ba0f-6f1e6b921b8f */
/* in the mixed-endian byte order the firmware expects */
pub const PERFORMANCE_MODE_GUID: [u8; 16] = [
    0x8d, 0x02, 0x46, 0x82, 0xca, 0x8b, 0x55, 0x4a, 0xba, 0x0f, 0x6f, 0x1e, 0x6b, 0x92, 0x1b, 0x8f,
];
pub const FNCN_PERFORMANCE_MODE: u8 = 0x51;
pub const SUBN_PERFORMANCE_MODE_LIST: u8 = 0x01;
pub const SUBN_PERFORMANCE_MODE_GET: u8 = 0x02;
pub const SUBN_PERFORMANCE_MODE_SET: u8 = 0x03;

/* A fixed-length command buffer of `N` bytes. */
#[derive(Clone, PartialEq, Eq)]
pub struct Sawb<const N: usize> {
    bytes: [u8; N],
}

pub type SettingsBuffer = Sawb<SETTINGS_LEN>;
pub type PerformanceModeBuffer = Sawb<PERFORMANCE_MODE_LEN>;

impl<const N: usize> Sawb<N> {
    fn with_header(sasb: u16) -> Self {
        let mut bytes = [0u8; N];
        bytes[SAFN_POS..SAFN_POS + 2].copy_from_slice(&SAFN.to_le_bytes());
        bytes[SASB_POS..SASB_POS + 2].copy_from_slice(&sasb.to_le_bytes());
        Self { bytes }
    }

    /* Reinterpret a raw response. Returns `None` unless it is exactly `N` bytes. */
    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        <[u8; N]>::try_from(buf).ok().map(|bytes| Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn safn(&self) -> u16 {
        u16::from_le_bytes([self.bytes[SAFN_POS], self.bytes[SAFN_POS + 1]])
    }

    pub fn sasb(&self) -> u16 {
        u16::from_le_bytes([self.bytes[SASB_POS], self.bytes[SASB_POS + 1]])
    }

    pub fn rflg(&self) -> u8 {
        self.bytes[RFLG_POS]
    }
}

impl SettingsBuffer {
    /* Build a settings request: opcode plus up to 15 payload bytes. */
    pub fn settings(sasb: u16, gunm: u8, guds: &[u8]) -> Self {
        let mut buf = Self::with_header(sasb);
        buf.bytes[GUNM_POS] = gunm;
        let len = guds.len().min(SETTINGS_LEN - GUDS_POS);
        buf.bytes[GUDS_POS..GUDS_POS + len].copy_from_slice(&guds[..len]);
        buf
    }

    pub fn gunm(&self) -> u8 {
        self.bytes[GUNM_POS]
    }

    pub fn guds(&self) -> &[u8] {
        &self.bytes[GUDS_POS..]
    }
}

impl PerformanceModeBuffer {
    /* Build a performance-mode request for the given sub-function. */
    pub fn performance_mode(subn: u8, iob: &[u8]) -> Self {
        let mut buf = Self::with_header(SASB_PERFORMANCE_MODE);
        buf.bytes[CAID_POS..CAID_POS + 16].copy_from_slice(&PERFORMANCE_MODE_GUID);
        buf.bytes[FNCN_POS] = FNCN_PERFORMANCE_MODE;
        buf.bytes[SUBN_POS] = subn;
        let len = iob.len().min(IOB_LEN);
        buf.bytes[IOB_POS..IOB_POS + len].copy_from_slice(&iob[..len]);
        buf
    }

    pub fn caid(&self) -> &[u8] {
        &self.bytes[CAID_POS..CAID_POS + 16]
    }

    pub fn fncn(&self) -> u8 {
        self.bytes[FNCN_POS]
    }

    pub fn subn(&self) -> u8 {
        self.bytes[SUBN_POS]
    }

    /* Data bytes following the selectors. Position 0 is `iob0`. */
    pub fn iob_values(&self) -> &[u8] {
        &self.bytes[IOB_POS..IOB_POS + IOB_LEN]
    }
}

impl<const N: usize> fmt::Debug for Sawb<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sawb<{N}>({:02x?})", &self.bytes[..])
    }
}
