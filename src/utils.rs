use std::path::PathBuf;

use anyhow::bail;
use time::{Date, OffsetDateTime, UtcOffset};
use tracing_subscriber::EnvFilter;

/// Calendar day of `ts` as seen in `offset`.
pub fn calendar_day(ts: OffsetDateTime, offset: UtcOffset) -> Date {
    ts.to_offset(offset).date()
}

/// 初始化日志
pub fn init_log(log: Option<PathBuf>) -> anyhow::Result<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber_builder = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_file(true)
        .with_line_number(true)
        .with_thread_names(true);
    let (non_blocking, guard) = if let Some(log) = log {
        // output to file，daily rotate, non-blocking
        if !log.is_dir() {
            bail!("log path {} is not a directory", log.display());
        }
        let file_appender = tracing_appender::rolling::daily(log, "vocab_server.log");
        tracing_appender::non_blocking(file_appender)
    } else {
        tracing_appender::non_blocking(std::io::stdout())
    };
    tracing::subscriber::set_global_default(subscriber_builder.with_writer(non_blocking).finish())?;
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{datetime, offset};

    #[test]
    fn calendar_day_follows_offset() {
        let ts = datetime!(2024-03-01 20:30 UTC);
        assert_eq!(calendar_day(ts, offset!(+0)), time::macros::date!(2024 - 03 - 01));
        assert_eq!(calendar_day(ts, offset!(+8)), time::macros::date!(2024 - 03 - 02));
    }
}
