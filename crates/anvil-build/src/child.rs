use anvil_core::EventSender;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::error::{BuildError, BuildResult};

/// Fail with `ToolMissing` unless `name` resolves on PATH.
pub(crate) fn require_tool(name: &str) -> BuildResult<()> {
    which::which(name)
        .map(|_| ())
        .map_err(|_| BuildError::ToolMissing(name.to_string()))
}

/// Parallelism for `make -j`.
pub(crate) fn ncpus() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZero::get)
        .unwrap_or(1)
}

/// Forward a child pipe to the event stream, one `Output` line at a time.
pub(crate) async fn pump_lines<R: AsyncRead + Unpin>(reader: R, events: EventSender) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        events.output(line).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anvil_core::BuildEvent;

    #[test]
    fn ncpus_is_positive() {
        assert!(ncpus() >= 1);
    }

    #[test]
    fn missing_tool_is_reported_by_name() {
        let err = require_tool("definitely-not-a-real-binary-42").unwrap_err();
        match err {
            BuildError::ToolMissing(name) => {
                assert_eq!(name, "definitely-not-a-real-binary-42");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn pump_forwards_each_line_as_output() {
        let (events, mut rx) = EventSender::channel(16);
        pump_lines(b"first\nsecond\n".as_slice(), events).await;

        let mut lines = Vec::new();
        while let Ok(event) = rx.try_recv() {
            match event {
                BuildEvent::Output(line) => lines.push(line),
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!(lines, vec!["first".to_string(), "second".to_string()]);
    }
}
