use crate::core::container::{Container, ElementKind, NodeData};
use crate::core::error::SeqError;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use std::io::Write;

/// What a block transform hands to a sink
#[derive(Debug, Clone, PartialEq)]
pub enum BlockValue {
    /// Text, written one line per entry
    Lines(Vec<String>),
    /// Raw bytes, written as they are
    Bytes(Vec<u8>),
    /// Typed records
    Data(NodeData),
}

impl BlockValue {
    fn describe(&self) -> &'static str {
        match self {
            BlockValue::Lines(_) => "text lines",
            BlockValue::Bytes(_) => "raw bytes",
            BlockValue::Data(_) => "typed records",
        }
    }
}

/// Destination of per-block results, fed in block order
pub trait BlockSink {
    fn accept(&mut self, block: usize, value: BlockValue) -> Result<()>;

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Keeps every block result in memory
#[derive(Debug, Default)]
pub struct CollectSink {
    pub values: Vec<BlockValue>,
}

impl BlockSink for CollectSink {
    fn accept(&mut self, _block: usize, value: BlockValue) -> Result<()> {
        self.values.push(value);
        Ok(())
    }
}

/// Streams text; typed records are rendered one element per line
pub struct TextSink<W: Write> {
    writer: W,
}

impl<W: Write> TextSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> BlockSink for TextSink<W> {
    fn accept(&mut self, block: usize, value: BlockValue) -> Result<()> {
        let lines = match value {
            BlockValue::Lines(lines) => lines,
            BlockValue::Data(data) => data.to_text(),
            other => {
                return Err(SeqError::contract(
                    block,
                    format!("a text sink needs text lines, the transform returned {}", other.describe()),
                )
                .into())
            }
        };
        for line in lines {
            writeln!(self.writer, "{}", line)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush().wrap_err("Failed to flush text output")
    }
}

/// Streams raw bytes
pub struct BinarySink<W: Write> {
    writer: W,
}

impl<W: Write> BinarySink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> BlockSink for BinarySink<W> {
    fn accept(&mut self, block: usize, value: BlockValue) -> Result<()> {
        match value {
            BlockValue::Bytes(bytes) => {
                self.writer.write_all(&bytes)?;
                Ok(())
            }
            other => Err(SeqError::contract(
                block,
                format!("a binary sink needs raw bytes, the transform returned {}", other.describe()),
            )
            .into()),
        }
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush().wrap_err("Failed to flush binary output")
    }
}

/// Appends block results as records of an existing node
pub struct AppendSink<'a> {
    container: &'a mut dyn Container,
    path: String,
}

impl<'a> AppendSink<'a> {
    pub fn new(container: &'a mut dyn Container, path: &str) -> Result<Self> {
        container.resolve_child(path, true)?;
        Ok(Self {
            container,
            path: path.to_string(),
        })
    }
}

impl BlockSink for AppendSink<'_> {
    fn accept(&mut self, block: usize, value: BlockValue) -> Result<()> {
        let info = self
            .container
            .resolve_child(&self.path, true)?
            .ok_or_else(|| SeqError::contract(block, format!("node '{}' vanished", self.path)))?;
        let data = match value {
            BlockValue::Data(data) => data,
            BlockValue::Lines(lines) if info.kind == ElementKind::String => NodeData::from_vec(lines),
            BlockValue::Bytes(bytes) if info.kind == ElementKind::UInt8 => NodeData::from_vec(bytes),
            other => {
                return Err(SeqError::contract(
                    block,
                    format!("cannot append {} to {} node '{}'", other.describe(), info.kind, self.path),
                )
                .into())
            }
        };
        if data.kind() != info.kind || data.shape().get(1..) != info.dims.get(1..) {
            return Err(SeqError::contract(
                block,
                format!(
                    "records of {} {:?} do not fit {} node '{}' {:?}",
                    data.kind(),
                    data.shape(),
                    info.kind,
                    self.path,
                    info.dims
                ),
            )
            .into());
        }
        self.container.append_range(&self.path, &data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::container::MemoryContainer;

    fn contract_block(err: color_eyre::Report) -> Option<usize> {
        match err.downcast_ref::<SeqError>() {
            Some(SeqError::Contract { block, .. }) => Some(*block),
            _ => None,
        }
    }

    #[test]
    fn test_text_sink() {
        let mut sink = TextSink::new(Vec::new());
        sink.accept(0, BlockValue::Lines(vec!["a".into(), "b".into()]))
            .unwrap();
        sink.accept(1, BlockValue::Data(NodeData::from_vec(vec![1i32, 2])))
            .unwrap();
        sink.finish().unwrap();
        assert_eq!(String::from_utf8(sink.into_inner()).unwrap(), "a\nb\n1\n2\n");
        let mut sink = TextSink::new(Vec::new());
        let err = sink.accept(3, BlockValue::Bytes(vec![1])).unwrap_err();
        assert_eq!(contract_block(err), Some(3));
    }

    #[test]
    fn test_binary_sink() {
        let mut sink = BinarySink::new(Vec::new());
        sink.accept(0, BlockValue::Bytes(vec![1, 2])).unwrap();
        sink.accept(1, BlockValue::Bytes(vec![3])).unwrap();
        assert_eq!(sink.into_inner(), vec![1, 2, 3]);
        let mut sink = BinarySink::new(Vec::new());
        let err = sink
            .accept(2, BlockValue::Lines(vec!["x".into()]))
            .unwrap_err();
        assert_eq!(contract_block(err), Some(2));
    }

    #[test]
    fn test_append_sink() {
        let mut c = MemoryContainer::new();
        c.create_node("out", ElementKind::Int32, &[]).unwrap();
        {
            let mut sink = AppendSink::new(&mut c, "out").unwrap();
            sink.accept(0, BlockValue::Data(NodeData::from_vec(vec![1i32, 2])))
                .unwrap();
            sink.accept(1, BlockValue::Data(NodeData::from_vec(vec![3i32])))
                .unwrap();
            let err = sink
                .accept(2, BlockValue::Data(NodeData::from_vec(vec![1.0f64])))
                .unwrap_err();
            assert_eq!(contract_block(err), Some(2));
            let err = sink
                .accept(4, BlockValue::Lines(vec!["x".into()]))
                .unwrap_err();
            assert_eq!(contract_block(err), Some(4));
        }
        assert_eq!(c.get("out").unwrap().to_vec::<i32>().unwrap(), vec![1, 2, 3]);
        assert!(AppendSink::new(&mut c, "missing").is_err());
    }
}
