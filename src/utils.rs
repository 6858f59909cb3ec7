/// Utility functions for formatting and timing
use time::{format_description, OffsetDateTime};
use tokio::sync::watch;
use tokio::time::{timeout, Duration};

/// Format a timestamp for human-readable logging
///
/// Converts an OffsetDateTime to DD.MM.YYYY - HH:MM:SS format.
/// Falls back to default string representation if formatting fails.
pub fn format_datetime(dt: &OffsetDateTime) -> String {
    match format_description::parse("[day].[month].[year] - [hour]:[minute]:[second]") {
        Ok(format) => dt.format(&format).unwrap_or_else(|_| dt.to_string()),
        Err(_) => dt.to_string(),
    }
}

/// Render a raw frame as `[aa bb cc]` for trace logging
pub fn hex_frame(bytes: &[u8]) -> String {
    let hex: Vec<String> = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    format!("[{}]", hex.join(" "))
}

/// Wait until `rx` has held a value matching `pred` for `quiet` without changing
///
/// Returns `None` if the sender goes away first.
pub async fn wait_settled<T, F>(
    rx: &mut watch::Receiver<T>,
    quiet: Duration,
    mut pred: F,
) -> Option<()>
where
    F: FnMut(&T) -> bool,
{
    loop {
        rx.wait_for(|value| pred(value)).await.ok()?;
        match timeout(quiet, rx.changed()).await {
            // quiet period elapsed
            Err(_) => return Some(()),
            Ok(Ok(())) => continue,
            Ok(Err(_)) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_frame_pads_bytes() {
        assert_eq!(hex_frame(&[0x01, 0xab, 0x00]), "[01 ab 00]");
        assert_eq!(hex_frame(&[]), "[]");
    }

    #[test]
    fn formats_datetime() {
        let dt = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        assert_eq!(format_datetime(&dt), "14.11.2023 - 22:13:20");
    }

    #[tokio::test(start_paused = true)]
    async fn settles_only_after_quiet_period() {
        let (tx, mut rx) = watch::channel(0u8);
        let waiter = tokio::spawn(async move {
            wait_settled(&mut rx, Duration::from_secs(1), |v| *v == 1).await
        });

        tx.send_replace(1);
        tokio::time::sleep(Duration::from_millis(500)).await;
        tx.send_replace(2);
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send_replace(1);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!waiter.is_finished());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(waiter.await.unwrap(), Some(()));
    }
}
