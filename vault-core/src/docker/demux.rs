use crate::constants::docker::STREAM_FRAME_HEADER_LEN;

/// 帧解析状态机的两个状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    /// 等待收齐8字节帧头
    AwaitingHeader,
    /// 等待当前帧payload的剩余字节
    AwaitingPayload { remaining: usize },
}

/// Docker exec 输出流解复用器
///
/// Docker 把 stdout/stderr 复用进一条字节流，帧格式为
/// `[流类型:1][保留:3][长度:4 大端][payload:长度字节]`。
/// 帧头和payload都可能被切在两次读取之间，残余字节必须跨
/// feed 调用保留：只按单次读取解析完整帧在大输出下会丢数据。
/// payload 字节按到达顺序拼接，在换行处切分成行。
#[derive(Debug)]
pub struct StreamDemuxer {
    state: ParseState,
    /// 尚未消费的原始字节（可能停在帧头或payload中间）
    pending: Vec<u8>,
    /// 已解出但尚未遇到换行的payload字节
    line_buf: Vec<u8>,
}

impl Default for StreamDemuxer {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamDemuxer {
    pub fn new() -> Self {
        Self {
            state: ParseState::AwaitingHeader,
            pending: Vec::new(),
            line_buf: Vec::new(),
        }
    }

    /// 喂入一段字节，返回本次新完成的行（不含换行符）
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();

        loop {
            match self.state {
                ParseState::AwaitingHeader => {
                    if self.pending.len() < STREAM_FRAME_HEADER_LEN {
                        break;
                    }
                    // 帧头字节0是流类型（1=stdout, 2=stderr），两路输出
                    // 按到达顺序合并成同一行序列，字节1..4保留不用
                    let length = u32::from_be_bytes([
                        self.pending[4],
                        self.pending[5],
                        self.pending[6],
                        self.pending[7],
                    ]) as usize;
                    self.pending.drain(..STREAM_FRAME_HEADER_LEN);
                    self.state = ParseState::AwaitingPayload { remaining: length };
                }
                ParseState::AwaitingPayload { remaining } => {
                    if remaining == 0 {
                        self.state = ParseState::AwaitingHeader;
                        continue;
                    }
                    if self.pending.is_empty() {
                        break;
                    }
                    let take = remaining.min(self.pending.len());
                    self.line_buf.extend(self.pending.drain(..take));
                    self.state = if take == remaining {
                        ParseState::AwaitingHeader
                    } else {
                        ParseState::AwaitingPayload {
                            remaining: remaining - take,
                        }
                    };
                    self.flush_lines(&mut lines);
                }
            }
        }

        lines
    }

    /// 流结束时取出最后一段未换行的数据
    pub fn finish(&mut self) -> Option<String> {
        if !self.pending.is_empty() {
            tracing::warn!(bytes = self.pending.len(), "exec 流在帧中间被截断，残余字节丢弃");
            self.pending.clear();
        }
        if self.line_buf.is_empty() {
            return None;
        }
        let text = decode_line(&self.line_buf);
        self.line_buf.clear();
        Some(text)
    }

    fn flush_lines(&mut self, lines: &mut Vec<String>) {
        while let Some(pos) = self.line_buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.line_buf.drain(..=pos).collect();
            line.pop(); // 去掉 '\n'
            lines.push(decode_line(&line));
        }
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    text.trim_end_matches('\r').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 按协议格式构造一帧
    fn frame(stream_type: u8, payload: &[u8]) -> Vec<u8> {
        let mut bytes = vec![stream_type, 0, 0, 0];
        bytes.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        bytes.extend_from_slice(payload);
        bytes
    }

    fn feed_all(demuxer: &mut StreamDemuxer, bytes: &[u8]) -> Vec<String> {
        let mut lines = demuxer.feed(bytes);
        if let Some(rest) = demuxer.finish() {
            lines.push(rest);
        }
        lines
    }

    #[test]
    fn test_single_frame_multiple_lines() {
        let mut demuxer = StreamDemuxer::new();
        let lines = feed_all(&mut demuxer, &frame(1, b"hello\nworld\n"));
        assert_eq!(lines, vec!["hello".to_string(), "world".to_string()]);
    }

    #[test]
    fn test_line_spans_frames() {
        let mut demuxer = StreamDemuxer::new();
        let mut stream = frame(1, b"pg_restore: creating ");
        stream.extend(frame(1, b"TABLE public.users\n"));

        let lines = feed_all(&mut demuxer, &stream);
        assert_eq!(lines, vec!["pg_restore: creating TABLE public.users".to_string()]);
    }

    #[test]
    fn test_stdout_stderr_merge_in_arrival_order() {
        let mut demuxer = StreamDemuxer::new();
        let mut stream = frame(1, b"out\n");
        stream.extend(frame(2, b"err\n"));
        stream.extend(frame(1, b"out2\n"));

        let lines = feed_all(&mut demuxer, &stream);
        assert_eq!(
            lines,
            vec!["out".to_string(), "err".to_string(), "out2".to_string()]
        );
    }

    #[test]
    fn test_split_mid_header() {
        let mut demuxer = StreamDemuxer::new();
        let stream = frame(1, b"split header\n");

        let mut lines = demuxer.feed(&stream[..3]);
        assert!(lines.is_empty());
        lines.extend(demuxer.feed(&stream[3..]));
        assert_eq!(lines, vec!["split header".to_string()]);
    }

    #[test]
    fn test_split_mid_payload() {
        let mut demuxer = StreamDemuxer::new();
        let stream = frame(1, b"split payload line\n");

        let mut lines = demuxer.feed(&stream[..12]);
        assert!(lines.is_empty());
        lines.extend(demuxer.feed(&stream[12..]));
        assert_eq!(lines, vec!["split payload line".to_string()]);
    }

    #[test]
    fn test_arbitrary_splits_match_unsplit_stream() {
        let mut stream = Vec::new();
        stream.extend(frame(1, b"alpha\nbra"));
        stream.extend(frame(2, b"vo\n"));
        stream.extend(frame(1, b""));
        stream.extend(frame(1, b"charlie\ntail"));

        let mut reference = StreamDemuxer::new();
        let expected = feed_all(&mut reference, &stream);
        assert_eq!(
            expected,
            vec!["alpha".to_string(), "bravo".to_string(), "charlie".to_string(), "tail".to_string()]
        );

        // 任意切分位置（含逐字节）必须还原出同一行序列
        for split_size in 1..stream.len() {
            let mut demuxer = StreamDemuxer::new();
            let mut lines = Vec::new();
            for chunk in stream.chunks(split_size) {
                lines.extend(demuxer.feed(chunk));
            }
            if let Some(rest) = demuxer.finish() {
                lines.push(rest);
            }
            assert_eq!(lines, expected, "切分大小 {split_size} 下结果不一致");
        }
    }

    #[test]
    fn test_crlf_stripped() {
        let mut demuxer = StreamDemuxer::new();
        let lines = feed_all(&mut demuxer, &frame(1, b"windows line\r\n"));
        assert_eq!(lines, vec!["windows line".to_string()]);
    }

    #[test]
    fn test_truncated_header_discarded() {
        let mut demuxer = StreamDemuxer::new();
        let mut stream = frame(1, b"ok\n");
        stream.extend_from_slice(&[1, 0, 0]); // 不完整帧头

        let lines = feed_all(&mut demuxer, &stream);
        assert_eq!(lines, vec!["ok".to_string()]);
    }
}
