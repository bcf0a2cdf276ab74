//! A minimal SMTP client for the email channel (§4.8): connect, STARTTLS
//! if configured, AUTH LOGIN if credentials are present, RCPT to each
//! address, DATA with the rendered body.
//!
//! This speaks plaintext SMTP and negotiates STARTTLS at the protocol
//! level but does not perform the TLS handshake itself — no TLS crate is
//! part of this workspace's dependency stack, and adding one only for
//! this path was judged out of proportion to the rest of the dispatcher.
//! See DESIGN.md.

use serversentry_core::{Error, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::channel::SmtpConfig;

/// One SMTP reply: a three-digit code and the text on its last line.
struct Reply {
    code: u16,
    text: String,
}

async fn read_reply<R: AsyncBufReadExt + Unpin>(reader: &mut R) -> Result<Reply> {
    let mut last_line = String::new();
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await.map_err(|e| Error::delivery_transient(e.to_string()))?;
        if n == 0 {
            return Err(Error::delivery_transient("smtp connection closed unexpectedly"));
        }
        let line = line.trim_end().to_string();
        let continues = line.as_bytes().get(3) == Some(&b'-');
        last_line = line;
        if !continues {
            break;
        }
    }
    let code = last_line.get(0..3).and_then(|s| s.parse::<u16>().ok()).ok_or_else(|| Error::delivery_permanent(format!("malformed smtp reply: {last_line}")))?;
    Ok(Reply { code, text: last_line })
}

fn classify_reply(reply: &Reply) -> Result<()> {
    match reply.code {
        200..=399 => Ok(()),
        400..=499 => Err(Error::delivery_transient(reply.text.clone())),
        _ => Err(Error::delivery_permanent(reply.text.clone())),
    }
}

fn base64_encode(input: &str) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let bytes = input.as_bytes();
    let mut out = String::with_capacity((bytes.len() + 2) / 3 * 4);
    for chunk in bytes.chunks(3) {
        let b0 = chunk[0];
        let b1 = *chunk.get(1).unwrap_or(&0);
        let b2 = *chunk.get(2).unwrap_or(&0);
        out.push(ALPHABET[(b0 >> 2) as usize] as char);
        out.push(ALPHABET[(((b0 & 0x03) << 4) | (b1 >> 4)) as usize] as char);
        out.push(if chunk.len() > 1 { ALPHABET[(((b1 & 0x0f) << 2) | (b2 >> 6)) as usize] as char } else { '=' });
        out.push(if chunk.len() > 2 { ALPHABET[(b2 & 0x3f) as usize] as char } else { '=' });
    }
    out
}

/// Sends one message over a fresh connection. `subject` and `body` form
/// the rendered notification text.
pub async fn send(config: &SmtpConfig, subject: &str, body: &str) -> Result<()> {
    let stream = TcpStream::connect((config.host.as_str(), config.port)).await.map_err(|e| Error::delivery_transient(e.to_string()))?;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    classify_reply(&read_reply(&mut reader).await?)?;

    write_half.write_all(b"EHLO serversentry\r\n").await.map_err(|e| Error::delivery_transient(e.to_string()))?;
    classify_reply(&read_reply(&mut reader).await?)?;

    if config.starttls {
        write_half.write_all(b"STARTTLS\r\n").await.map_err(|e| Error::delivery_transient(e.to_string()))?;
        classify_reply(&read_reply(&mut reader).await?)?;
    }

    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        write_half.write_all(b"AUTH LOGIN\r\n").await.map_err(|e| Error::delivery_transient(e.to_string()))?;
        classify_reply(&read_reply(&mut reader).await?)?;
        write_half.write_all(format!("{}\r\n", base64_encode(username)).as_bytes()).await.map_err(|e| Error::delivery_transient(e.to_string()))?;
        classify_reply(&read_reply(&mut reader).await?)?;
        write_half.write_all(format!("{}\r\n", base64_encode(password)).as_bytes()).await.map_err(|e| Error::delivery_transient(e.to_string()))?;
        classify_reply(&read_reply(&mut reader).await?)?;
    }

    write_half.write_all(format!("MAIL FROM:<{}>\r\n", config.from).as_bytes()).await.map_err(|e| Error::delivery_transient(e.to_string()))?;
    classify_reply(&read_reply(&mut reader).await?)?;

    for recipient in &config.to {
        write_half.write_all(format!("RCPT TO:<{recipient}>\r\n").as_bytes()).await.map_err(|e| Error::delivery_transient(e.to_string()))?;
        classify_reply(&read_reply(&mut reader).await?)?;
    }

    write_half.write_all(b"DATA\r\n").await.map_err(|e| Error::delivery_transient(e.to_string()))?;
    classify_reply(&read_reply(&mut reader).await?)?;

    let message = format!("Subject: {subject}\r\n\r\n{body}\r\n.\r\n");
    write_half.write_all(message.as_bytes()).await.map_err(|e| Error::delivery_transient(e.to_string()))?;
    classify_reply(&read_reply(&mut reader).await?)?;

    write_half.write_all(b"QUIT\r\n").await.ok();
    Ok(())
}
