//! Newline-delimited JSON flight format
//!
//! A reference wire format for staged payloads, with a matching decoder
//! and prerenderer. Each line is one [`FlightRow`]:
//!
//! - `tree` declares the segment tree; every segment starts pending
//! - `head` sets the document head
//! - `segment` sets (or replaces) the content of one segment
//!
//! Later rows win, so a later stage can resolve a segment an earlier stage
//! left pending. Rows may be split across chunks arbitrarily.

use crate::capability::{ChunkStream, DecodeOptions, Prelude, PrerenderClient, RscDecoder};
use crate::error::ValidateError;
use crate::payload::{FlightPayload, RscNode, SeedData, SegmentPath, SegmentTree};
use bytes::{Bytes, BytesMut};
use futures::stream::StreamExt;
use serde::{Deserialize, Serialize};

/// One line of the flight format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "row", rename_all = "snake_case")]
pub enum FlightRow {
    /// Segment tree declaration
    Tree {
        /// The route tree
        tree: SegmentTree,
    },
    /// Document head
    Head {
        /// Head content
        node: RscNode,
    },
    /// Content of one segment
    Segment {
        /// Segment position
        path: SegmentPath,
        /// Segment content
        node: RscNode,
    },
}

impl FlightRow {
    /// Encode as one newline-terminated line
    ///
    /// # Errors
    /// Returns `ValidateError::Decode` if the row cannot be serialized.
    pub fn encode(&self) -> Result<Bytes, ValidateError> {
        let mut line =
            serde_json::to_vec(self).map_err(|err| ValidateError::Decode(err.to_string()))?;
        line.push(b'\n');
        Ok(Bytes::from(line))
    }
}

/// Decoder for the newline-delimited JSON format
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRowDecoder;

impl JsonRowDecoder {
    /// Decode a buffer of rows
    ///
    /// A trailing line without its newline has not been fully received
    /// yet and is ignored, so a bucket cut inside a row decodes to the
    /// rows before the cut.
    ///
    /// # Errors
    /// Returns `ValidateError::Decode` for malformed rows, rows naming an
    /// unknown segment, or a payload without a tree row.
    pub fn decode_bytes(&self, bytes: &[u8]) -> Result<FlightPayload, ValidateError> {
        let mut payload: Option<FlightPayload> = None;
        let mut head = RscNode::default();

        let received = bytes
            .iter()
            .rposition(|byte| *byte == b'\n')
            .map_or(&bytes[..0], |end| &bytes[..=end]);
        if received.len() < bytes.len() {
            tracing::trace!(
                partial = bytes.len() - received.len(),
                "ignoring incomplete trailing row"
            );
        }

        let lines = received
            .split(|byte| *byte == b'\n')
            .enumerate()
            .filter(|(_, line)| !line.iter().all(u8::is_ascii_whitespace));
        for (number, line) in lines {
            let row: FlightRow = serde_json::from_slice(line)
                .map_err(|err| ValidateError::Decode(format!("line {}: {err}", number + 1)))?;
            match row {
                FlightRow::Tree { tree } => {
                    let seed = SeedData::skeleton(&tree);
                    payload = Some(FlightPayload {
                        tree,
                        seed,
                        head: RscNode::default(),
                    });
                }
                FlightRow::Head { node } => head = node,
                FlightRow::Segment { path, node } => {
                    let target = payload
                        .as_mut()
                        .ok_or_else(|| {
                            ValidateError::Decode(format!(
                                "line {}: segment row before tree row",
                                number + 1
                            ))
                        })?
                        .seed
                        .find_mut(&path)
                        .ok_or_else(|| {
                            ValidateError::Decode(format!(
                                "line {}: unknown segment {path}",
                                number + 1
                            ))
                        })?;
                    target.node = node;
                }
            }
        }

        let mut payload =
            payload.ok_or_else(|| ValidateError::Decode("payload has no tree row".into()))?;
        payload.head = head;
        Ok(payload)
    }
}

#[async_trait::async_trait]
impl RscDecoder for JsonRowDecoder {
    async fn decode(
        &self,
        mut stream: ChunkStream,
        options: &DecodeOptions,
    ) -> Result<FlightPayload, ValidateError> {
        if let Some(url) = &options.find_source_map_url {
            tracing::trace!(%url, "source map lookups are not used by the row decoder");
        }
        let mut buffer = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            buffer.extend_from_slice(&chunk);
        }
        self.decode_bytes(&buffer)
    }
}

/// Prerenders a payload to plain text
///
/// A boundary whose content is incomplete renders its fallback. Pending
/// data outside any boundary means no prelude can be produced.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextPrerenderer;

impl TextPrerenderer {
    /// Render `payload` synchronously
    ///
    /// # Errors
    /// Returns `ValidateError::Prerender` if content outside every boundary
    /// is still pending.
    pub fn render(&self, payload: &FlightPayload) -> Result<Prelude, ValidateError> {
        let mut text = String::new();
        render_node(&payload.head, &mut text)?;
        render_node(&payload.seed.to_node(), &mut text)?;
        Ok(Prelude { text })
    }
}

fn render_node(node: &RscNode, out: &mut String) -> Result<(), ValidateError> {
    match node {
        RscNode::Text { value } => out.push_str(value),
        RscNode::Fragment { children } => {
            for child in children {
                render_node(child, out)?;
            }
        }
        RscNode::Pending { id } => {
            return Err(ValidateError::Prerender(format!(
                "{id} suspended outside a boundary"
            )));
        }
        RscNode::Boundary { fallback, content } => {
            if content.is_incomplete() {
                render_node(fallback, out)?;
            } else {
                render_node(content, out)?;
            }
        }
    }
    Ok(())
}

#[async_trait::async_trait]
impl PrerenderClient for TextPrerenderer {
    async fn prerender(&self, payload: FlightPayload) -> Result<Prelude, ValidateError> {
        self.render(&payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use futures::stream;
    use pretty_assertions::assert_eq;

    fn rows() -> Vec<FlightRow> {
        vec![
            FlightRow::Tree {
                tree: SegmentTree::leaf("").with_child(SegmentTree::leaf("page")),
            },
            FlightRow::Head {
                node: RscNode::text("<title>t</title>"),
            },
            FlightRow::Segment {
                path: SegmentPath::root(),
                node: RscNode::text("<body>"),
            },
            FlightRow::Segment {
                path: SegmentPath::root().child("page"),
                node: RscNode::text("hello"),
            },
        ]
    }

    fn encode(rows: &[FlightRow]) -> Vec<u8> {
        rows.iter()
            .flat_map(|row| row.encode().unwrap().to_vec())
            .collect()
    }

    #[test]
    fn rows_split_across_chunks_decode() {
        let bytes = encode(&rows());
        let (left, right) = bytes.split_at(bytes.len() / 2);
        let chunks = stream::iter(vec![
            Bytes::copy_from_slice(left),
            Bytes::copy_from_slice(right),
        ])
        .boxed();

        let payload = block_on(JsonRowDecoder.decode(chunks, &DecodeOptions::default())).unwrap();
        let prelude = TextPrerenderer.render(&payload).unwrap();
        assert_eq!(prelude.text, "<title>t</title><body>hello");
    }

    #[test]
    fn row_cut_at_the_end_is_not_received_yet() {
        let mut bytes = encode(&rows()[..3]);
        let cut = rows()[3].encode().unwrap();
        bytes.extend_from_slice(&cut[..10]);

        let payload = JsonRowDecoder.decode_bytes(&bytes).unwrap();
        let page = payload.seed.find(&SegmentPath::root().child("page")).unwrap();
        assert!(page.node.is_incomplete());
        assert_eq!(payload.head, RscNode::text("<title>t</title>"));
    }

    #[test]
    fn later_rows_replace_earlier_ones() {
        let mut rows = rows();
        rows.push(FlightRow::Segment {
            path: SegmentPath::root().child("page"),
            node: RscNode::text("bye"),
        });
        let payload = JsonRowDecoder.decode_bytes(&encode(&rows)).unwrap();
        assert!(TextPrerenderer.render(&payload).unwrap().text.ends_with("bye"));
    }

    #[test]
    fn missing_tree_is_an_error() {
        let err = JsonRowDecoder.decode_bytes(b"").unwrap_err();
        assert_eq!(err, ValidateError::Decode("payload has no tree row".into()));
    }

    #[test]
    fn unknown_segment_is_an_error() {
        let mut rows = rows();
        rows.push(FlightRow::Segment {
            path: SegmentPath::root().child("nope"),
            node: RscNode::text("x"),
        });
        let err = JsonRowDecoder.decode_bytes(&encode(&rows)).unwrap_err();
        assert!(err.to_string().contains("unknown segment /nope"));
    }

    #[test]
    fn pending_outside_boundary_has_no_prelude() {
        let payload = JsonRowDecoder.decode_bytes(&encode(&rows()[..1])).unwrap();
        assert!(matches!(
            TextPrerenderer.render(&payload),
            Err(ValidateError::Prerender(_))
        ));
    }

    #[test]
    fn incomplete_boundary_renders_fallback() {
        let mut payload = JsonRowDecoder.decode_bytes(&encode(&rows())).unwrap();
        payload.seed.node = RscNode::boundary(RscNode::text("loading"), RscNode::pending("data"));
        let prelude = TextPrerenderer.render(&payload).unwrap();
        assert_eq!(prelude.text, "<title>t</title>loadinghello");
    }
}
