//! NDJSON writer – one JSON-encoded [`Event`](cloudtap_types::Event) per line.

use cloudtap_middleware::TopicReceiver;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Write every event from `clouds` and `status` to `out` until both topics
/// are closed.  Returns the number of lines written.
pub async fn forward_events<W>(
    mut clouds: TopicReceiver,
    mut status: TopicReceiver,
    mut out: W,
) -> std::io::Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0u64;
    let (mut clouds_open, mut status_open) = (true, true);

    while clouds_open || status_open {
        let event = tokio::select! {
            next = clouds.next_event(), if clouds_open => match next {
                Some(event) => event,
                None => {
                    clouds_open = false;
                    continue;
                }
            },
            next = status.next_event(), if status_open => match next {
                Some(event) => event,
                None => {
                    status_open = false;
                    continue;
                }
            },
        };

        let mut line = serde_json::to_vec(&event).map_err(std::io::Error::other)?;
        line.push(b'\n');
        out.write_all(&line).await?;
        out.flush().await?;
        written += 1;
    }
    Ok(written)
}
