//! AXI-Lite register map of the ring-down FPGA bitstream.
//!
//! All registers are 32 bits wide and addressed by byte offset from the base
//! of the control window.
//!
//! The bitstream names its DMA engines from the memory's point of view: the
//! *writer* engine streams the stimulus out of RAM towards the DAC and the
//! *reader* engine stores ADC samples into the capture region.

/// Identity constant register ("ÅABC" for the ring-down bitstream).
pub const MLA_CONST: usize = 0x00;
/// Start address of the stimulus region (absolute).
pub const WRITER_MIN_ADDRESS: usize = 0x04;
/// Number of stimulus bursts.
pub const WRITER_NUM_BURSTS: usize = 0x08;
/// Soft reset; 1 holds the design in reset.
pub const SOFT_RESET: usize = 0x0C;
/// Current stimulus DMA pointer.
pub const WRITER_WRITE_PTR: usize = 0x10;
/// Stimulus engine done-flag (bit 0).
pub const WRITER_DONE: usize = 0x14;
/// Relaxation window in microseconds (relay open).
pub const RELAXATION_TIME: usize = 0x18;
/// Excitation window in microseconds (relay closed).
pub const EXCITATION_TIME: usize = 0x1C;
/// Start address of the capture region (absolute).
pub const READER_MIN_ADDRESS: usize = 0x20;
/// Current capture DMA pointer.
pub const READER_READ_PTR: usize = 0x24;
/// Capture engine done-flag (bit 0).
pub const READER_DONE: usize = 0x28;
/// Capture engine completed-burst counter.
pub const READER_COMP_BURST_OUT: usize = 0x2C;
/// Number of capture bursts.
pub const READER_NUM_BURSTS: usize = 0x30;
/// Stimulus engine completed-burst counter.
pub const WRITER_COMP_BURST_OUT: usize = 0x34;
/// Capture engine continuous mode.
pub const READER_CONTINUOUS_MODE: usize = 0x38;
/// Stimulus engine continuous mode.
pub const WRITER_CONTINUOUS_MODE: usize = 0x3C;
/// Relay enable.
pub const RELAY_ENABLED: usize = 0x40;
/// External trigger enable.
pub const TRIGGER_ENABLED: usize = 0x44;

/// Expected value of [`MLA_CONST`]: the bytes `C5 41 42 43`, read big-endian
/// as the Latin-1 string "ÅABC".
pub const EXPECTED_IDENTITY: u32 = 0xC541_4243;

/// Mask of the done bit in [`WRITER_DONE`] and [`READER_DONE`].
pub const DONE_BIT: u32 = 0x1;

/// Size in bytes of the register span (last register offset + 4).
pub const SPAN: usize = TRIGGER_ENABLED + 4;

/// Every register with its name, in address order. Used for diagnostic dumps.
pub const ALL: [(&str, usize); 18] = [
    ("MLA_CONST", MLA_CONST),
    ("WRITER_MIN_ADDRESS", WRITER_MIN_ADDRESS),
    ("WRITER_NUM_BURSTS", WRITER_NUM_BURSTS),
    ("SOFT_RESET", SOFT_RESET),
    ("WRITER_WRITE_PTR", WRITER_WRITE_PTR),
    ("WRITER_DONE", WRITER_DONE),
    ("RELAXATION_TIME", RELAXATION_TIME),
    ("EXCITATION_TIME", EXCITATION_TIME),
    ("READER_MIN_ADDRESS", READER_MIN_ADDRESS),
    ("READER_READ_PTR", READER_READ_PTR),
    ("READER_DONE", READER_DONE),
    ("READER_COMP_BURST_OUT", READER_COMP_BURST_OUT),
    ("READER_NUM_BURSTS", READER_NUM_BURSTS),
    ("WRITER_COMP_BURST_OUT", WRITER_COMP_BURST_OUT),
    ("READER_CONTINUOUS_MODE", READER_CONTINUOUS_MODE),
    ("WRITER_CONTINUOUS_MODE", WRITER_CONTINUOUS_MODE),
    ("RELAY_ENABLED", RELAY_ENABLED),
    ("TRIGGER_ENABLED", TRIGGER_ENABLED),
];

/// Look up the name of a register offset.
pub fn name(offset: usize) -> Option<&'static str> {
    ALL.iter()
        .find(|(_, addr)| *addr == offset)
        .map(|(name, _)| *name)
}

/// Decode an identity register value into its four-character label.
///
/// The value is read big-endian and each byte is taken as a Latin-1
/// character; NUL and surrounding whitespace are dropped.
pub fn identity_label(raw: u32) -> String {
    raw.to_be_bytes()
        .iter()
        .map(|&b| char::from(b))
        .filter(|c| *c != '\0')
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_span() {
        assert_eq!(SPAN, 0x48);
        for window in ALL.windows(2) {
            assert_eq!(window[1].1 - window[0].1, 4, "{} not contiguous", window[1].0);
        }
    }

    #[test]
    fn test_expected_identity_label() {
        assert_eq!(identity_label(EXPECTED_IDENTITY), "ÅABC");
        assert_eq!(identity_label(0x0000_4142), "AB");
    }

    #[test]
    fn test_name_lookup() {
        assert_eq!(name(SOFT_RESET), Some("SOFT_RESET"));
        assert_eq!(name(0x48), None);
    }
}
