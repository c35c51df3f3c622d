#[cfg(windows)]
pub fn setup_console() {
    use windows_sys::Win32::System::Console::{
        GetStdHandle, GetConsoleMode, SetConsoleMode, SetConsoleOutputCP,
        STD_OUTPUT_HANDLE, ENABLE_VIRTUAL_TERMINAL_PROCESSING,
    };
    // The status line relies on `\r` redraws and UTF-8 output.
    unsafe {
        SetConsoleOutputCP(65001);
        let handle = GetStdHandle(STD_OUTPUT_HANDLE);
        let mut mode = 0;
        if GetConsoleMode(handle, &mut mode) != 0 {
            SetConsoleMode(handle, mode | ENABLE_VIRTUAL_TERMINAL_PROCESSING);
        }
    }
}

#[cfg(not(windows))]
pub fn setup_console() {}

/// Bits per second to megabits per second, rounded to two decimals.
///
/// Rounds the exact binary value, ties to even, so `0.015` (really
/// `0.01499..`) becomes `0.01`. Scaling by 100 before rounding would not.
pub fn megabits(bits_per_second: f64) -> f64 {
    let mbps = bits_per_second / 1_000_000.0;
    format!("{mbps:.2}").parse().unwrap_or(mbps)
}

/// Rate over a transfer; zero when nothing was timed.
pub fn bits_per_second(bytes: u64, seconds: f64) -> f64 {
    if seconds <= 0.0 {
        return 0.0;
    }
    (bytes as f64 * 8.0) / seconds
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn megabits_rounds_to_hundredths() {
        assert_eq!(megabits(0.0), 0.0);
        assert_eq!(megabits(1_234_567.0), 1.23);
        assert_eq!(megabits(1_236_000.0), 1.24);
    }

    #[test]
    fn megabits_rounds_the_exact_value_at_half_cents() {
        assert_eq!(megabits(15_000.0), 0.01);
        assert_eq!(megabits(1_005_000.0), 1.0);
        assert_eq!(megabits(2_675_000.0), 2.67);
        assert_eq!(megabits(125_000.0), 0.12);
        assert_eq!(megabits(375_000.0), 0.38);
    }

    #[test]
    fn rate_guards_against_zero_duration() {
        assert_eq!(bits_per_second(1000, 0.0), 0.0);
        assert_eq!(bits_per_second(1000, 2.0), 4000.0);
    }
}
