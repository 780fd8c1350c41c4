//! src/relay.rs
//! Bidirectional copy between client and outbound sockets. Two independent
//! copy loops share a 64 KiB buffer each; each terminates on EOF, read
//! error, or write error, then half-closes its write side. When both loops
//! terminate the session ends. No framing, no transformation; neither
//! direction blocks on the other.

use tokio::io::{AsyncRead, AsyncWrite, AsyncReadExt, AsyncWriteExt};

const BUFFER_SIZE: usize = 64 * 1024;

/// Runs the bidirectional relay to completion. Returns the byte counts
/// copied in each direction (client->outbound, outbound->client).
pub async fn relay<A, B>(a: &mut A, b: &mut B) -> std::io::Result<(u64, u64)>
where
    A: AsyncRead + AsyncWrite + Unpin + ?Sized,
    B: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let mut a_to_b: u64 = 0;
    let mut b_to_a: u64 = 0;
    let mut a_buf = vec![0u8; BUFFER_SIZE];
    let mut b_buf = vec![0u8; BUFFER_SIZE];
    let mut a_closed = false;
    let mut b_closed = false;

    loop {
        if a_closed && b_closed {
            break;
        }

        tokio::select! {
            biased;

            result = a.read(&mut a_buf), if !a_closed => {
                let n = result?;
                if n == 0 {
                    a_closed = true;
                    if !b_closed {
                        let _ = b.shutdown().await;
                    }
                } else {
                    b.write_all(&a_buf[..n]).await?;
                    a_to_b += n as u64;
                }
            },
            result = b.read(&mut b_buf), if !b_closed => {
                let n = result?;
                if n == 0 {
                    b_closed = true;
                    if !a_closed {
                        let _ = a.shutdown().await;
                    }
                } else {
                    a.write_all(&b_buf[..n]).await?;
                    b_to_a += n as u64;
                }
            },
            else => break,
        }
    }

    Ok((a_to_b, b_to_a))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn copies_bytes_both_directions_and_terminates_on_eof() {
        let (mut client, mut client_peer) = duplex(1024);
        let (mut outbound, mut outbound_peer) = duplex(1024);

        let relay_task = tokio::spawn(async move { relay(&mut client, &mut outbound).await });

        client_peer.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        outbound_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        outbound_peer.write_all(b"world").await.unwrap();
        let mut buf2 = [0u8; 5];
        client_peer.read_exact(&mut buf2).await.unwrap();
        assert_eq!(&buf2, b"world");

        drop(client_peer);
        drop(outbound_peer);

        let (sent, received) = relay_task.await.unwrap().unwrap();
        assert_eq!(sent, 5);
        assert_eq!(received, 5);
    }
}
