//! Line input and control tokens for interactive mode.

use std::io::{self, BufRead, BufReader, Read, Write};
use tokio::sync::mpsc;
use tracing::warn;

/// What a line typed at the chat prompt means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    Quit,
    Menu,
    /// Start multi-line input, terminated by an empty line.
    Multi,
    History,
    Clear,
    Empty,
    Query(String),
}

pub fn parse_control(line: &str) -> Control {
    let trimmed = line.trim();
    match trimmed.to_ascii_lowercase().as_str() {
        "" => Control::Empty,
        "quit" | "exit" => Control::Quit,
        "menu" => Control::Menu,
        "multi" => Control::Multi,
        "history" => Control::History,
        "clear" => Control::Clear,
        _ => Control::Query(trimmed.to_string()),
    }
}

/// Lines of user input.
///
/// Reading happens on a dedicated OS thread that feeds a channel. A read
/// blocked on the terminal then never holds up runtime shutdown, and
/// [`read_line`](Self::read_line) is cancel safe inside `select!`.
pub struct Prompt {
    lines: mpsc::Receiver<io::Result<String>>,
}

impl Prompt {
    pub fn stdin() -> Self {
        Self::from_reader(io::stdin())
    }

    pub fn from_reader<R: Read + Send + 'static>(reader: R) -> Self {
        let (tx, lines) = mpsc::channel(16);
        let spawned = std::thread::Builder::new()
            .name("redscope-input".into())
            .spawn(move || {
                for line in BufReader::new(reader).lines() {
                    let failed = line.is_err();
                    if tx.blocking_send(line).is_err() || failed {
                        break;
                    }
                }
            });
        if let Err(e) = spawned {
            // The sender was dropped with the closure: reads report end of input.
            warn!(error = %e, "Could not start the input reader");
        }
        Self { lines }
    }

    /// Show `prompt` and read one line. `None` at end of input.
    pub async fn read_line(&mut self, prompt: &str) -> io::Result<Option<String>> {
        if !prompt.is_empty() {
            print!("{prompt}");
            let _ = io::stdout().flush();
        }
        self.lines.recv().await.transpose()
    }

    /// Read lines until an empty one. `None` if nothing was entered before
    /// end of input.
    pub async fn read_multiline(&mut self) -> io::Result<Option<String>> {
        let mut collected = Vec::new();
        while let Some(line) = self.read_line("").await? {
            if line.trim().is_empty() {
                break;
            }
            collected.push(line);
        }
        Ok((!collected.is_empty()).then(|| collected.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_tokens() {
        assert_eq!(parse_control("quit"), Control::Quit);
        assert_eq!(parse_control(" EXIT "), Control::Quit);
        assert_eq!(parse_control("menu"), Control::Menu);
        assert_eq!(parse_control("multi"), Control::Multi);
        assert_eq!(parse_control("history"), Control::History);
        assert_eq!(parse_control("clear"), Control::Clear);
        assert_eq!(parse_control("   "), Control::Empty);
        assert_eq!(
            parse_control("  scan example.com "),
            Control::Query("scan example.com".into())
        );
    }

    #[tokio::test]
    async fn multiline_stops_at_empty_line() {
        let mut prompt = Prompt::from_reader(&b"first line\nsecond line\n\nnext query\n"[..]);
        assert_eq!(
            prompt.read_multiline().await.unwrap().as_deref(),
            Some("first line\nsecond line")
        );
        assert_eq!(prompt.read_line("").await.unwrap().as_deref(), Some("next query"));
        assert_eq!(prompt.read_line("").await.unwrap(), None);
    }

    #[tokio::test]
    async fn multiline_at_eof() {
        let mut prompt = Prompt::from_reader(&b""[..]);
        assert_eq!(prompt.read_multiline().await.unwrap(), None);

        let mut prompt = Prompt::from_reader(&b"unterminated"[..]);
        assert_eq!(prompt.read_multiline().await.unwrap().as_deref(), Some("unterminated"));
    }

    /// Blocks until the test drops the sender.
    struct Stalled(std::sync::mpsc::Receiver<()>);

    impl Read for Stalled {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            let _ = self.0.recv();
            Ok(0)
        }
    }

    #[test]
    fn pending_read_does_not_hold_up_runtime_shutdown() {
        let (release, stalled) = std::sync::mpsc::channel::<()>();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let mut prompt = Prompt::from_reader(Stalled(stalled));
            let read = tokio::time::timeout(
                std::time::Duration::from_millis(50),
                prompt.read_line(""),
            )
            .await;
            assert!(read.is_err());
        });

        // Returns even though the reader thread is still blocked.
        drop(runtime);
        drop(release);
    }

    #[tokio::test]
    async fn read_line_is_cancel_safe() {
        let mut prompt = Prompt::from_reader(&b"scan example.com\n"[..]);
        tokio::select! {
            biased;
            _ = std::future::ready(()) => {}
            _ = prompt.read_line("") => panic!("ready branch wins"),
        }
        assert_eq!(
            prompt.read_line("").await.unwrap().as_deref(),
            Some("scan example.com")
        );
    }
}
