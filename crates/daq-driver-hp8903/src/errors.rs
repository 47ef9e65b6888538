//! HP 8903 numbered error codes.
//!
//! When a measurement cannot be made the analyzer still answers with a
//! number, but one far above any real reading (`+9ccE+05`-style). The two
//! digits at offset 4 of that reply select an entry of the table below
//! (HP 8903B Operating Manual, "Error Message Summary").

/// Readings above this value are error reports, not measurements.
pub const ERROR_SENTINEL: f64 = 4.0e9;

/// Byte offset of the two-digit error code inside an error reply.
pub const ERROR_CODE_OFFSET: usize = 4;

/// Description reported for codes missing from [`ERROR_TABLE`].
pub const UNKNOWN_ERROR: &str = "Unknown instrument error.";

/// Error code to description.
pub const ERROR_TABLE: &[(u8, &str)] = &[
    (10, "Reading too large for display."),
    (11, "Calculated value out of range."),
    (13, "Notch cannot tune to input."),
    (14, "Input level exceeds instrument specifications."),
    (17, "Internal voltmeter cannot make measurement."),
    (18, "Source cannot tune as requested."),
    (19, "Cannot confirm source frequency."),
    (20, "Entered value out of range."),
    (21, "Invalid key sequence."),
    (22, "Invalid Special Function prefix."),
    (23, "Invalid Special Function suffix."),
    (24, "Invalid HP-IB code."),
    (25, "Top and bottom plotter limits are identical."),
    (26, "RATIO not allowed in present mode."),
    (30, "Input overload detector tripped in range plot."),
    (31, "Cannot make measurement."),
    (32, "More than 255 points total in a sweep."),
    (96, "No signal sensed at input."),
];

/// Description of `code`, if the analyzer defines it.
pub fn lookup(code: u8) -> Option<&'static str> {
    ERROR_TABLE
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, description)| *description)
}

/// Description of `code`, falling back to [`UNKNOWN_ERROR`].
pub fn describe(code: u8) -> &'static str {
    lookup(code).unwrap_or(UNKNOWN_ERROR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes() {
        assert_eq!(describe(10), "Reading too large for display.");
        assert_eq!(describe(96), "No signal sensed at input.");
        assert_eq!(ERROR_TABLE.len(), 18);
    }

    #[test]
    fn test_unknown_code_falls_back() {
        assert_eq!(lookup(12), None);
        assert_eq!(describe(12), UNKNOWN_ERROR);
    }
}
