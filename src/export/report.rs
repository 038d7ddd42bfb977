use std::io::Write;
use std::time::Duration;

use crate::state::{StatsReport, Target};

/// Write the end-of-session statistics block
pub fn write_report<W: Write>(
    target: &Target,
    report: &StatsReport,
    mut writer: W,
) -> std::io::Result<()> {
    writeln!(writer)?;
    writeln!(writer, "--- {} ping statistics ---", target.original)?;
    writeln!(
        writer,
        "{} packets transmitted, {} received, {}% packet loss",
        report.sent,
        report.received,
        format_loss(report.loss_pct)
    )?;
    writeln!(
        writer,
        "rtt min/avg/max/stddev = {}/{}/{}/{} ms, total = {} ms",
        format_ms(report.min_rtt),
        format_ms(report.avg_rtt),
        format_ms(report.max_rtt),
        format_ms(report.std_dev_rtt),
        format_ms(report.total_rtt)
    )?;
    Ok(())
}

/// Generate report to string
pub fn report_string(target: &Target, report: &StatsReport) -> std::io::Result<String> {
    let mut buf = Vec::new();
    write_report(target, report, &mut buf)?;
    String::from_utf8(buf).map_err(std::io::Error::other)
}

/// Milliseconds with microsecond precision
pub fn format_ms(d: Duration) -> String {
    format!("{:.3}", d.as_secs_f64() * 1000.0)
}

fn format_loss(pct: f64) -> String {
    if pct.fract() == 0.0 {
        format!("{:.0}", pct)
    } else {
        format!("{:.1}", pct)
    }
}
