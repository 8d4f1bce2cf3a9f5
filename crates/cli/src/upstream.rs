//! Upstream client decorated with the capture tap.
//!
//! One struct plays both roles: it is the [`PromptSurface`] that issues
//! the streaming request, and the [`NetworkObserver`] holding the tap that
//! watches it. The tap lives in a plain slot; the capture single-flight
//! guard is the only thing keeping installs from stacking.

use std::borrow::Cow;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use relay::{NetworkObserver, PromptSurface, RelayError, Result, SessionTap};
use serde_json::json;
use tracing::debug;

pub struct UpstreamClient {
	http: reqwest::Client,
	url: String,
	tap: Mutex<Option<SessionTap>>,
}

impl UpstreamClient {
	pub fn new(url: impl Into<String>) -> Self {
		Self { http: reqwest::Client::new(), url: url.into(), tap: Mutex::new(None) }
	}
}

impl NetworkObserver for UpstreamClient {
	fn install(&self, tap: SessionTap) {
		*self.tap.lock() = Some(tap);
	}

	fn restore(&self) {
		self.tap.lock().take();
	}
}

#[async_trait]
impl PromptSurface for UpstreamClient {
	/// Submits the prompt and, when the installed tap matches the target
	/// endpoint, hands the response body off to a background streaming
	/// task that feeds the tap. Returns as soon as the exchange is opened;
	/// the capture session owns completion from there.
	async fn submit(&self, prompt: &str) -> Result<()> {
		let tap = self.tap.lock().clone().filter(|tap| tap.matches(&self.url));

		let response = self
			.http
			.post(&self.url)
			.json(&json!({ "prompt": prompt }))
			.send()
			.await
			.map_err(|err| RelayError::Upstream(err.to_string()))?;

		let Some(tap) = tap else {
			debug!(target = "relay.capture", url = %self.url, "no tap for exchange, passing through");
			return Ok(());
		};

		tap.opened();
		tokio::spawn(stream_body(response, tap));
		Ok(())
	}
}

/// Accumulates the growing response body and replays it through the tap,
/// mirroring a progress-event transport: full text on every notification,
/// then load on clean EOF or error on transport failure.
async fn stream_body(response: reqwest::Response, tap: SessionTap) {
	if let Err(err) = response.error_for_status_ref() {
		tap.errored(&err.to_string());
		return;
	}

	let mut stream = response.bytes_stream();
	let mut decoder = BodyDecoder::default();
	while let Some(next) = stream.next().await {
		match next {
			Ok(bytes) => {
				decoder.push(&bytes);
				tap.progress(&decoder.text());
			}
			Err(err) => {
				tap.errored(&err.to_string());
				return;
			}
		}
	}
	tap.progress(&decoder.finish());
	tap.loaded();
}

/// Incremental UTF-8 decoder over the raw response bytes.
///
/// The transport splits the body on frame boundaries, which can land in
/// the middle of a multi-byte sequence; decoding each frame on its own
/// would turn the split character into replacement chars on both sides.
/// Bytes accumulate raw and only the longest complete prefix is exposed,
/// holding a trailing partial sequence back until its continuation
/// arrives.
#[derive(Default)]
struct BodyDecoder {
	buf: Vec<u8>,
}

impl BodyDecoder {
	fn push(&mut self, bytes: &[u8]) {
		self.buf.extend_from_slice(bytes);
	}

	/// Full text observed so far, up to the last complete character.
	fn text(&self) -> Cow<'_, str> {
		match std::str::from_utf8(&self.buf) {
			Ok(text) => Cow::Borrowed(text),
			// An unexpected end is a split sequence; hold it back.
			Err(err) if err.error_len().is_none() => String::from_utf8_lossy(&self.buf[..err.valid_up_to()]),
			// Genuinely invalid bytes decode lossily rather than stall.
			Err(_) => String::from_utf8_lossy(&self.buf),
		}
	}

	/// Final text at EOF; a still-incomplete trailing sequence can no
	/// longer complete and decodes lossily.
	fn finish(self) -> String {
		String::from_utf8_lossy(&self.buf).into_owned()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn multibyte_sequence_split_across_frames_decodes_intact() {
		// "é" = [0xC3, 0xA9] arriving one byte per frame.
		let mut decoder = BodyDecoder::default();
		decoder.push(&[0xC3]);
		assert_eq!(decoder.text(), "");
		decoder.push(&[0xA9]);
		assert_eq!(decoder.text(), "é");
		assert_eq!(decoder.finish(), "é");
	}

	#[test]
	fn complete_prefix_is_exposed_while_the_tail_is_held_back() {
		let mut decoder = BodyDecoder::default();
		let bytes = "ab→cd".as_bytes();
		decoder.push(&bytes[..3]); // "ab" plus the first byte of "→"
		assert_eq!(decoder.text(), "ab");
		decoder.push(&bytes[3..]);
		assert_eq!(decoder.text(), "ab→cd");
	}

	#[test]
	fn truncated_trailing_sequence_decodes_lossily_at_eof() {
		let mut decoder = BodyDecoder::default();
		decoder.push(&[b'a', 0xC3]);
		assert_eq!(decoder.text(), "a");
		assert_eq!(decoder.finish(), "a\u{FFFD}");
	}

	#[test]
	fn invalid_bytes_do_not_stall_the_decoded_prefix() {
		let mut decoder = BodyDecoder::default();
		decoder.push(b"ab\xFFcd");
		assert_eq!(decoder.text(), "ab\u{FFFD}cd");
	}
}
