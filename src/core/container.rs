use crate::core::error::SeqError;
use bitvec::prelude::*;
use color_eyre::eyre::{bail, eyre};
use color_eyre::Result;
use ndarray::{ArrayD, Axis, IxDyn, Slice};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Storage type of a node's elements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    /// Bit-width-1 logical values
    Bool,
    UInt8,
    Int32,
    Float64,
    String,
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementKind::Bool => "bool",
            ElementKind::UInt8 => "uint8",
            ElementKind::Int32 => "int32",
            ElementKind::Float64 => "float64",
            ElementKind::String => "string",
        };
        write!(f, "{}", name)
    }
}

/// Typed contents of a node, or the result of reading part of one.
///
/// Axis 0 is the record axis: it is the axis that grows on append and the
/// axis that range and mask reads address. Remaining axes are fixed at node
/// creation.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeData {
    Bool(ArrayD<bool>),
    UInt8(ArrayD<u8>),
    Int32(ArrayD<i32>),
    Float64(ArrayD<f64>),
    String(ArrayD<String>),
}

macro_rules! map_data {
    ($value:expr, $arr:ident => $body:expr) => {
        match $value {
            NodeData::Bool($arr) => NodeData::Bool($body),
            NodeData::UInt8($arr) => NodeData::UInt8($body),
            NodeData::Int32($arr) => NodeData::Int32($body),
            NodeData::Float64($arr) => NodeData::Float64($body),
            NodeData::String($arr) => NodeData::String($body),
        }
    };
}

macro_rules! with_data {
    ($value:expr, $arr:ident => $body:expr) => {
        match $value {
            NodeData::Bool($arr) => $body,
            NodeData::UInt8($arr) => $body,
            NodeData::Int32($arr) => $body,
            NodeData::Float64($arr) => $body,
            NodeData::String($arr) => $body,
        }
    };
}

/// Element types a node can hold
pub trait Element: Clone + PartialEq + Send + Sync + 'static {
    const KIND: ElementKind;

    /// Value written where a record has no data
    fn missing() -> Self;

    fn wrap(array: ArrayD<Self>) -> NodeData;

    fn view(data: &NodeData) -> Option<&ArrayD<Self>>;

    fn into_owned(data: NodeData) -> Option<ArrayD<Self>>;

    fn to_text(&self) -> String;
}

macro_rules! impl_element {
    ($ty:ty, $variant:ident, $missing:expr, $text:expr) => {
        impl Element for $ty {
            const KIND: ElementKind = ElementKind::$variant;

            fn missing() -> Self {
                $missing
            }

            fn wrap(array: ArrayD<Self>) -> NodeData {
                NodeData::$variant(array)
            }

            fn view(data: &NodeData) -> Option<&ArrayD<Self>> {
                match data {
                    NodeData::$variant(a) => Some(a),
                    _ => None,
                }
            }

            fn into_owned(data: NodeData) -> Option<ArrayD<Self>> {
                match data {
                    NodeData::$variant(a) => Some(a),
                    _ => None,
                }
            }

            fn to_text(&self) -> String {
                let render: fn(&$ty) -> String = $text;
                render(self)
            }
        }
    };
}

/// Missing marker for 32-bit integers, shared with genotype and dosage output
pub const MISSING_I32: i32 = i32::MIN;
/// Missing marker for byte output
pub const MISSING_U8: u8 = u8::MAX;

impl_element!(bool, Bool, false, |v| (if *v { "TRUE" } else { "FALSE" }).to_string());
impl_element!(u8, UInt8, MISSING_U8, |v| if *v == MISSING_U8 {
    "NA".to_string()
} else {
    v.to_string()
});
impl_element!(i32, Int32, MISSING_I32, |v| if *v == MISSING_I32 {
    "NA".to_string()
} else {
    v.to_string()
});
impl_element!(f64, Float64, f64::NAN, |v| if v.is_nan() {
    "NA".to_string()
} else {
    v.to_string()
});
impl_element!(String, String, String::new(), |v| v.clone());

impl<T: Element> From<ArrayD<T>> for NodeData {
    fn from(array: ArrayD<T>) -> Self {
        T::wrap(array)
    }
}

impl NodeData {
    /// An empty node with the given trailing dimensions
    pub fn empty(kind: ElementKind, inner: &[usize]) -> Self {
        let mut shape = vec![0];
        shape.extend_from_slice(inner);
        match kind {
            ElementKind::Bool => NodeData::Bool(ArrayD::default(IxDyn(&shape))),
            ElementKind::UInt8 => NodeData::UInt8(ArrayD::default(IxDyn(&shape))),
            ElementKind::Int32 => NodeData::Int32(ArrayD::default(IxDyn(&shape))),
            ElementKind::Float64 => NodeData::Float64(ArrayD::default(IxDyn(&shape))),
            ElementKind::String => NodeData::String(ArrayD::default(IxDyn(&shape))),
        }
    }

    /// One record of missing values
    pub fn missing_record(kind: ElementKind, inner: &[usize]) -> Self {
        let mut shape = vec![1];
        shape.extend_from_slice(inner);
        let shape = IxDyn(&shape);
        match kind {
            ElementKind::Bool => NodeData::Bool(ArrayD::from_elem(shape, bool::missing())),
            ElementKind::UInt8 => NodeData::UInt8(ArrayD::from_elem(shape, u8::missing())),
            ElementKind::Int32 => NodeData::Int32(ArrayD::from_elem(shape, i32::missing())),
            ElementKind::Float64 => NodeData::Float64(ArrayD::from_elem(shape, f64::missing())),
            ElementKind::String => NodeData::String(ArrayD::from_elem(shape, String::missing())),
        }
    }

    /// A one-dimensional node from a vector
    pub fn from_vec<T: Element>(values: Vec<T>) -> Self {
        T::wrap(ndarray::Array1::from(values).into_dyn())
    }

    /// Build from row-major values and an explicit shape
    pub fn from_shape_vec<T: Element>(shape: &[usize], values: Vec<T>) -> Result<Self> {
        let array = ArrayD::from_shape_vec(IxDyn(shape), values)
            .map_err(|e| eyre!("Invalid shape {:?}: {}", shape, e))?;
        Ok(T::wrap(array))
    }

    pub fn kind(&self) -> ElementKind {
        match self {
            NodeData::Bool(_) => ElementKind::Bool,
            NodeData::UInt8(_) => ElementKind::UInt8,
            NodeData::Int32(_) => ElementKind::Int32,
            NodeData::Float64(_) => ElementKind::Float64,
            NodeData::String(_) => ElementKind::String,
        }
    }

    pub fn shape(&self) -> &[usize] {
        with_data!(self, a => a.shape())
    }

    /// Number of records (extent of axis 0)
    pub fn len(&self) -> usize {
        self.shape().first().copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of elements over all axes
    pub fn num_elements(&self) -> usize {
        with_data!(self, a => a.len())
    }

    pub fn as_array<T: Element>(&self) -> Option<&ArrayD<T>> {
        T::view(self)
    }

    pub fn into_array<T: Element>(self) -> Option<ArrayD<T>> {
        T::into_owned(self)
    }

    /// Flattened row-major copy of the elements
    pub fn to_vec<T: Element>(&self) -> Option<Vec<T>> {
        T::view(self).map(|a| a.iter().cloned().collect())
    }

    /// Each element rendered as text, row-major
    pub fn to_text(&self) -> Vec<String> {
        with_data!(self, a => a.iter().map(|v| v.to_text()).collect())
    }

    pub fn slice_records(&self, start: usize, count: usize) -> NodeData {
        map_data!(self, a => a
            .slice_axis(Axis(0), Slice::from(start..start + count))
            .to_owned())
    }

    pub fn select_axis(&self, axis: usize, indices: &[usize]) -> NodeData {
        map_data!(self, a => a.select(Axis(axis), indices))
    }

    /// Spread the records over `present.len()` slots in order, writing the
    /// missing value into every slot whose flag is unset.
    pub fn pad_missing(&self, present: &[bool]) -> Result<NodeData> {
        let filled = present.iter().filter(|&&p| p).count();
        if filled != self.len() {
            bail!(
                "{} records cannot fill {} present slots",
                self.len(),
                filled
            );
        }
        fn pad<T: Element>(a: &ArrayD<T>, present: &[bool]) -> ArrayD<T> {
            let mut shape = a.shape().to_vec();
            shape[0] = present.len();
            let mut out = ArrayD::from_elem(IxDyn(&shape), T::missing());
            let mut next = 0;
            for (slot, _) in present.iter().enumerate().filter(|&(_, &p)| p) {
                out.index_axis_mut(Axis(0), slot)
                    .assign(&a.index_axis(Axis(0), next));
                next += 1;
            }
            out
        }
        Ok(map_data!(self, a => pad(a, present)))
    }

    /// Append records along axis 0
    pub fn append(&mut self, other: &NodeData) -> Result<()> {
        if self.kind() != other.kind() {
            return Err(SeqError::validation(format!(
                "Cannot append {} values to a {} node",
                other.kind(),
                self.kind()
            ))
            .into());
        }
        if self.shape()[1..] != other.shape()[1..] {
            return Err(SeqError::validation(format!(
                "Cannot append records of shape {:?} to a node with record shape {:?}",
                &other.shape()[1..],
                &self.shape()[1..]
            ))
            .into());
        }
        match (self, other) {
            (NodeData::Bool(a), NodeData::Bool(b)) => a.append(Axis(0), b.view())?,
            (NodeData::UInt8(a), NodeData::UInt8(b)) => a.append(Axis(0), b.view())?,
            (NodeData::Int32(a), NodeData::Int32(b)) => a.append(Axis(0), b.view())?,
            (NodeData::Float64(a), NodeData::Float64(b)) => a.append(Axis(0), b.view())?,
            (NodeData::String(a), NodeData::String(b)) => a.append(Axis(0), b.view())?,
            _ => unreachable!("kinds checked above"),
        }
        Ok(())
    }
}

/// Shape and type of a node, as reported by the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub path: String,
    pub kind: ElementKind,
    pub dims: Vec<usize>,
}

impl NodeInfo {
    pub fn ndim(&self) -> usize {
        self.dims.len()
    }
}

/// Narrow contract to the hierarchical array container.
///
/// Paths are `/`-separated node names relative to the root, e.g.
/// `genotype/data`. All reads address axis 0; an optional column mask may
/// restrict axis 1.
pub trait Container {
    /// Look up a node. With `must_exist` a missing node is an error,
    /// otherwise `None`.
    fn resolve_child(&self, path: &str, must_exist: bool) -> Result<Option<NodeInfo>>;

    fn read_range(&self, path: &str, start: usize, count: usize) -> Result<NodeData>;

    /// Read the records `start..start + rows.len()` for which `rows` is set,
    /// keeping only the axis-1 entries set in `cols` when given.
    fn read_masked(
        &self,
        path: &str,
        start: usize,
        rows: &BitSlice,
        cols: Option<&BitSlice>,
    ) -> Result<NodeData>;

    /// Append one or more records
    fn append_range(&mut self, path: &str, values: &NodeData) -> Result<()>;

    fn create_node(&mut self, path: &str, kind: ElementKind, inner: &[usize]) -> Result<()>;

    fn node_paths(&self) -> Vec<String>;

    fn dims(&self, path: &str) -> Result<Vec<usize>> {
        let info = self
            .resolve_child(path, true)?
            .ok_or_else(|| eyre!("No node '{}'", path))?;
        Ok(info.dims)
    }

    /// Append a single record
    fn append_value(&mut self, path: &str, value: &NodeData) -> Result<()> {
        if value.len() != 1 {
            bail!(
                "append_value expects exactly one record, got {} for '{}'",
                value.len(),
                path
            );
        }
        self.append_range(path, value)
    }
}

/// In-memory node tree.
///
/// Used directly for scratch destinations and tests, and as the loaded form
/// of a Zarr store (see [`crate::core::zarr`]).
#[derive(Debug, Clone, Default)]
pub struct MemoryContainer {
    nodes: BTreeMap<String, NodeData>,
}

impl MemoryContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a node with existing contents
    pub fn insert(&mut self, path: &str, data: NodeData) {
        self.nodes.insert(normalize(path).to_string(), data);
    }

    pub fn get(&self, path: &str) -> Option<&NodeData> {
        self.nodes.get(normalize(path))
    }

    pub fn remove(&mut self, path: &str) -> Option<NodeData> {
        self.nodes.remove(normalize(path))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &NodeData)> {
        self.nodes.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn node(&self, path: &str) -> Result<&NodeData> {
        self.nodes
            .get(normalize(path))
            .ok_or_else(|| eyre!("No node '{}' in container", path))
    }
}

fn normalize(path: &str) -> &str {
    path.trim_matches('/')
}

impl Container for MemoryContainer {
    fn resolve_child(&self, path: &str, must_exist: bool) -> Result<Option<NodeInfo>> {
        match self.nodes.get(normalize(path)) {
            Some(data) => Ok(Some(NodeInfo {
                path: normalize(path).to_string(),
                kind: data.kind(),
                dims: data.shape().to_vec(),
            })),
            None if must_exist => bail!("No node '{}' in container", path),
            None => Ok(None),
        }
    }

    fn read_range(&self, path: &str, start: usize, count: usize) -> Result<NodeData> {
        let data = self.node(path)?;
        if start + count > data.len() {
            bail!(
                "Range {}..{} out of bounds for '{}' with {} records",
                start,
                start + count,
                path,
                data.len()
            );
        }
        Ok(data.slice_records(start, count))
    }

    fn read_masked(
        &self,
        path: &str,
        start: usize,
        rows: &BitSlice,
        cols: Option<&BitSlice>,
    ) -> Result<NodeData> {
        let data = self.node(path)?;
        if start + rows.len() > data.len() {
            bail!(
                "Mask over {}..{} out of bounds for '{}' with {} records",
                start,
                start + rows.len(),
                path,
                data.len()
            );
        }
        let row_idx: Vec<usize> = rows.iter_ones().map(|i| start + i).collect();
        let selected = data.select_axis(0, &row_idx);
        match cols {
            None => Ok(selected),
            Some(cols) => {
                let width = data.shape().get(1).copied().ok_or_else(|| {
                    eyre!("Column mask given for one-dimensional node '{}'", path)
                })?;
                if cols.len() != width {
                    bail!(
                        "Column mask length {} does not match axis 1 of '{}' ({})",
                        cols.len(),
                        path,
                        width
                    );
                }
                let col_idx: Vec<usize> = cols.iter_ones().collect();
                Ok(selected.select_axis(1, &col_idx))
            }
        }
    }

    fn append_range(&mut self, path: &str, values: &NodeData) -> Result<()> {
        let data = self
            .nodes
            .get_mut(normalize(path))
            .ok_or_else(|| eyre!("No node '{}' in container", path))?;
        data.append(values)
    }

    fn create_node(&mut self, path: &str, kind: ElementKind, inner: &[usize]) -> Result<()> {
        let key = normalize(path);
        if self.nodes.contains_key(key) {
            bail!("Node '{}' already exists", path);
        }
        self.nodes.insert(key.to_string(), NodeData::empty(kind, inner));
        Ok(())
    }

    fn node_paths(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_matrix() -> MemoryContainer {
        let mut c = MemoryContainer::new();
        c.create_node("annotation/format/DP/data", ElementKind::Int32, &[3])
            .unwrap();
        let rows = NodeData::from_shape_vec(&[3, 3], (0..9).collect::<Vec<i32>>()).unwrap();
        c.append_range("annotation/format/DP/data", &rows).unwrap();
        c
    }

    #[test]
    fn test_create_and_dims() {
        let c = int_matrix();
        assert_eq!(c.dims("annotation/format/DP/data").unwrap(), vec![3, 3]);
        assert!(c.resolve_child("missing", false).unwrap().is_none());
        assert!(c.resolve_child("missing", true).is_err());
    }

    #[test]
    fn test_read_masked_rows_and_cols() {
        let c = int_matrix();
        let rows = bitvec![1, 0];
        let cols = bitvec![1, 0, 1];
        let data = c
            .read_masked("annotation/format/DP/data", 1, &rows, Some(&cols))
            .unwrap();
        assert_eq!(data.shape(), &[1, 2]);
        assert_eq!(data.to_vec::<i32>().unwrap(), vec![3, 5]);
    }

    #[test]
    fn test_read_range_out_of_bounds() {
        let c = int_matrix();
        assert!(c.read_range("annotation/format/DP/data", 2, 2).is_err());
        let tail = c.read_range("annotation/format/DP/data", 2, 1).unwrap();
        assert_eq!(tail.to_vec::<i32>().unwrap(), vec![6, 7, 8]);
    }

    #[test]
    fn test_append_rejects_kind_mismatch() {
        let mut c = MemoryContainer::new();
        c.create_node("allele", ElementKind::String, &[]).unwrap();
        let err = c
            .append_value("allele", &NodeData::from_vec(vec![1i32]))
            .unwrap_err();
        assert!(err.to_string().contains("int32"));
        c.append_value("allele", &NodeData::from_vec(vec!["A,G".to_string()]))
            .unwrap();
        assert_eq!(c.dims("allele").unwrap(), vec![1]);
    }

    #[test]
    fn test_pad_missing() {
        let data = NodeData::from_vec(vec![1.5f64, 2.5]);
        let padded = data.pad_missing(&[false, true, false, true]).unwrap();
        let values = padded.to_vec::<f64>().unwrap();
        assert!(values[0].is_nan() && values[2].is_nan());
        assert_eq!((values[1], values[3]), (1.5, 2.5));
        assert!(data.pad_missing(&[true]).is_err());
    }

    #[test]
    fn test_missing_record_uses_sentinels() {
        let rec = NodeData::missing_record(ElementKind::Int32, &[2]);
        assert_eq!(rec.shape(), &[1, 2]);
        assert_eq!(rec.to_vec::<i32>().unwrap(), vec![MISSING_I32, MISSING_I32]);
        assert_eq!(rec.to_text(), vec!["NA", "NA"]);
    }
}
