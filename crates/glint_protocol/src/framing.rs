#![forbid(unsafe_code)]

/// Reassembles CRLF-terminated lines from arbitrary transport chunks.
///
/// A chunk may contain zero, one, or many complete lines, and a line may
/// span several chunks; the remainder is retained until its terminator
/// arrives.
#[derive(Debug, Default)]
pub struct LineBuffer {
	buf: String,
}

impl LineBuffer {
	pub fn new() -> Self {
		Self::default()
	}

	/// Append a received chunk.
	pub fn push(&mut self, chunk: &str) {
		self.buf.push_str(chunk);
	}

	/// Extract the next complete line, without its CRLF terminator.
	pub fn next_line(&mut self) -> Option<String> {
		let pos = self.buf.find("\r\n")?;
		let line = self.buf[..pos].to_string();
		self.buf.drain(..pos + 2);
		Some(line)
	}

	/// Bytes currently buffered without a terminator.
	pub fn pending_len(&self) -> usize {
		self.buf.len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn line_spanning_chunks_is_reassembled() {
		let mut buf = LineBuffer::new();
		buf.push("PING :tmi.twit");
		assert_eq!(buf.next_line(), None);
		buf.push("ch.tv\r\n");
		assert_eq!(buf.next_line().as_deref(), Some("PING :tmi.twitch.tv"));
		assert_eq!(buf.pending_len(), 0);
	}

	#[test]
	fn chunk_with_multiple_lines_yields_each_in_order() {
		let mut buf = LineBuffer::new();
		buf.push("one\r\ntwo\r\nthr");
		assert_eq!(buf.next_line().as_deref(), Some("one"));
		assert_eq!(buf.next_line().as_deref(), Some("two"));
		assert_eq!(buf.next_line(), None);
		buf.push("ee\r\n");
		assert_eq!(buf.next_line().as_deref(), Some("three"));
	}

	#[test]
	fn bare_newline_is_not_a_terminator() {
		let mut buf = LineBuffer::new();
		buf.push("partial\nstill partial");
		assert_eq!(buf.next_line(), None);
	}
}
