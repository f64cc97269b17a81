use crate::core::container::{
    Container, Element, ElementKind, MemoryContainer, NodeData, MISSING_I32, MISSING_U8,
};
use crate::core::file::{GENOTYPE_DATA, POSITION, SAMPLE_ID};
use color_eyre::eyre::{bail, eyre, WrapErr};
use color_eyre::Result;
use indexmap::IndexSet;
use log::debug;
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU64;
use std::path::Path;
use std::sync::Arc;
use zarrs::array::codec::{
    BloscCodec, BloscCompressionLevel, BloscCompressor, BloscShuffleMode, PackBitsCodec,
};
use zarrs::array::chunk_grid::ChunkGrid;
use zarrs::array::{Array, ArrayBuilder, DataType, FillValue};
use zarrs::filesystem::FilesystemStore;
use zarrs::group::{Group, GroupBuilder};
use zarrs::storage::{ReadableWritableListableStorage, ReadableWritableListableStorageTraits};

/// Root group attribute holding [`StoreMetadata`]
pub const METADATA_KEY: &str = "seqzarr_metadata";
pub const FORMAT_VERSION: u32 = 1;

/// Records per chunk along the variant axis
const CHUNK_RECORDS: u64 = 4096;

pub type OpenArray = Array<dyn ReadableWritableListableStorageTraits>;

/// One stored node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEntry {
    pub path: String,
    pub kind: ElementKind,
    pub shape: Vec<u64>,
}

/// Summary written to the root group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMetadata {
    pub format_version: u32,
    pub num_samples: usize,
    pub num_variants: usize,
    pub ploidy: usize,
    pub nodes: Vec<NodeEntry>,
}

pub fn is_zarr_path(path: &Path) -> bool {
    if !path.is_dir() {
        return false;
    }

    if path.join("zarr.json").exists() {
        return true;
    }

    if path.join(".zgroup").exists() || path.join(".zarray").exists() {
        return true;
    }

    false
}

fn open_store(path: &Path) -> Result<ReadableWritableListableStorage> {
    let store = Arc::new(FilesystemStore::new(path)?);
    Ok(store)
}

/// Write every node of `container` as one array of a new store at `path`.
///
/// Nodes without elements are only listed in the metadata.
pub fn save(container: &MemoryContainer, path: impl AsRef<Path>) -> Result<StoreMetadata> {
    let path = path.as_ref();
    if path.exists() {
        bail!("Output '{}' already exists", path.display());
    }
    let store = open_store(path)?;
    let metadata = describe(container)?;

    let mut group = GroupBuilder::new().build(store.clone(), "/")?;
    group
        .attributes_mut()
        .insert(METADATA_KEY.to_string(), serde_json::to_value(&metadata)?);
    group.store_metadata()?;

    let mut groups = IndexSet::new();
    for entry in &metadata.nodes {
        let parts: Vec<&str> = entry.path.split('/').collect();
        for depth in 1..parts.len() {
            groups.insert(parts[..depth].join("/"));
        }
    }
    for prefix in &groups {
        GroupBuilder::new()
            .build(store.clone(), &format!("/{}", prefix))?
            .store_metadata()?;
    }

    for (node_path, data) in container.iter() {
        if data.num_elements() == 0 {
            continue;
        }
        let array = create_array(&store, node_path, data)?;
        store_node(&array, data).wrap_err_with(|| format!("Failed to write node '{}'", node_path))?;
    }
    debug!(
        "Saved {} nodes ({} groups) to {}",
        metadata.nodes.len(),
        groups.len(),
        path.display()
    );
    Ok(metadata)
}

/// Load every node listed in the store's metadata
pub fn load(path: impl AsRef<Path>) -> Result<MemoryContainer> {
    let path = path.as_ref();
    if !is_zarr_path(path) {
        bail!("'{}' is not a Zarr store", path.display());
    }
    let store = open_store(path)?;
    let metadata = read_metadata_from(&store)?;

    let mut container = MemoryContainer::new();
    for entry in &metadata.nodes {
        let shape: Vec<usize> = entry.shape.iter().map(|&d| d as usize).collect();
        let data = if shape.iter().product::<usize>() == 0 {
            empty_with_shape(entry.kind, &shape)?
        } else {
            let array = Array::open(store.clone(), &format!("/{}", entry.path))
                .wrap_err_with(|| format!("Failed to open node '{}'", entry.path))?;
            retrieve_node(&array, entry.kind, &shape)
                .wrap_err_with(|| format!("Failed to read node '{}'", entry.path))?
        };
        container.insert(&entry.path, data);
    }
    debug!("Loaded {} nodes from {}", metadata.nodes.len(), path.display());
    Ok(container)
}

/// Store summary without loading any node
pub fn read_metadata(path: impl AsRef<Path>) -> Result<StoreMetadata> {
    let path = path.as_ref();
    if !is_zarr_path(path) {
        bail!("'{}' is not a Zarr store", path.display());
    }
    read_metadata_from(&open_store(path)?)
}

fn read_metadata_from(store: &ReadableWritableListableStorage) -> Result<StoreMetadata> {
    let group = Group::open(store.clone(), "/")?;
    let value = group
        .attributes()
        .get(METADATA_KEY)
        .ok_or_else(|| eyre!("Missing {} in zarr root", METADATA_KEY))?;
    let metadata: StoreMetadata = serde_json::from_value(value.clone())
        .wrap_err_with(|| format!("Invalid {} in zarr root", METADATA_KEY))?;
    if metadata.format_version != FORMAT_VERSION {
        bail!(
            "Unsupported store format version {} (expected {})",
            metadata.format_version,
            FORMAT_VERSION
        );
    }
    Ok(metadata)
}

fn describe(container: &MemoryContainer) -> Result<StoreMetadata> {
    let len_of = |path: &str| -> Result<usize> {
        Ok(match container.resolve_child(path, false)? {
            Some(info) => info.dims.first().copied().unwrap_or(0),
            None => 0,
        })
    };
    let ploidy = match container.resolve_child(GENOTYPE_DATA, false)? {
        Some(info) if info.ndim() == 3 => info.dims[2],
        _ => 0,
    };
    let nodes = container
        .iter()
        .map(|(path, data)| NodeEntry {
            path: path.to_string(),
            kind: data.kind(),
            shape: data.shape().iter().map(|&d| d as u64).collect(),
        })
        .collect();
    Ok(StoreMetadata {
        format_version: FORMAT_VERSION,
        num_samples: len_of(SAMPLE_ID)?,
        num_variants: len_of(POSITION)?,
        ploidy,
        nodes,
    })
}

fn data_type(kind: ElementKind) -> (DataType, FillValue) {
    match kind {
        ElementKind::Bool => (DataType::Bool, FillValue::from(false)),
        ElementKind::UInt8 => (DataType::UInt8, FillValue::from(MISSING_U8)),
        ElementKind::Int32 => (DataType::Int32, FillValue::from(MISSING_I32)),
        ElementKind::Float64 => (DataType::Float64, FillValue::from(f64::NAN)),
        ElementKind::String => (DataType::String, FillValue::from("")),
    }
}

fn chunk_grid(chunk_shape: &[u64]) -> Result<ChunkGrid> {
    let dims = chunk_shape
        .iter()
        .map(|&d| {
            NonZeroU64::new(d)
                .ok_or_else(|| eyre!("Chunk shape {:?} has a zero extent", chunk_shape))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(ChunkGrid::from(dims))
}

fn create_array(
    store: &ReadableWritableListableStorage,
    node_path: &str,
    data: &NodeData,
) -> Result<OpenArray> {
    let shape: Vec<u64> = data.shape().iter().map(|&d| d as u64).collect();
    let mut chunk_shape: Vec<u64> = shape.iter().map(|&d| d.max(1)).collect();
    chunk_shape[0] = shape[0].clamp(1, CHUNK_RECORDS);
    let chunk_grid = chunk_grid(&chunk_shape)?;
    let kind = data.kind();
    let (data_type, fill_value) = data_type(kind);

    let mut builder = ArrayBuilder::new(shape, data_type, chunk_grid, fill_value);
    let builder = match kind {
        ElementKind::Bool => builder.array_to_bytes_codec(Arc::new(PackBitsCodec::default())),
        ElementKind::String => &mut builder,
        ElementKind::UInt8 | ElementKind::Int32 | ElementKind::Float64 => {
            let typesize = match kind {
                ElementKind::UInt8 => 1,
                ElementKind::Int32 => 4,
                _ => 8,
            };
            let level = BloscCompressionLevel::try_from(5)
                .map_err(|e| eyre!("Invalid Blosc compression level: {:?}", e))?;
            builder.bytes_to_bytes_codecs(vec![Arc::new(BloscCodec::new(
                BloscCompressor::Zstd,
                level,
                None,
                BloscShuffleMode::Shuffle,
                Some(typesize),
            )?)])
        }
    };

    let array = builder.build(store.clone(), &format!("/{}", node_path))?;
    array.store_metadata()?;
    Ok(array)
}

fn store_elements<T>(array: &OpenArray, values: &ArrayD<T>) -> Result<()>
where
    T: Element + zarrs::array::Element,
{
    let elements: Vec<T> = values.iter().cloned().collect();
    array.store_array_subset_elements::<T>(&array.subset_all(), &elements)?;
    Ok(())
}

fn store_node(array: &OpenArray, data: &NodeData) -> Result<()> {
    match data {
        NodeData::Bool(a) => store_elements(array, a),
        NodeData::UInt8(a) => store_elements(array, a),
        NodeData::Int32(a) => store_elements(array, a),
        NodeData::Float64(a) => store_elements(array, a),
        NodeData::String(a) => store_elements(array, a),
    }
}

fn retrieve_elements<T>(array: &OpenArray, shape: &[usize]) -> Result<NodeData>
where
    T: Element + zarrs::array::ElementOwned,
{
    let stored: Vec<usize> = array.shape().iter().map(|&d| d as usize).collect();
    if stored != shape {
        bail!("Stored shape {:?} does not match metadata {:?}", stored, shape);
    }
    let elements = array.retrieve_array_subset_elements::<T>(&array.subset_all())?;
    NodeData::from_shape_vec(shape, elements)
}

fn retrieve_node(array: &OpenArray, kind: ElementKind, shape: &[usize]) -> Result<NodeData> {
    match kind {
        ElementKind::Bool => retrieve_elements::<bool>(array, shape),
        ElementKind::UInt8 => retrieve_elements::<u8>(array, shape),
        ElementKind::Int32 => retrieve_elements::<i32>(array, shape),
        ElementKind::Float64 => retrieve_elements::<f64>(array, shape),
        ElementKind::String => retrieve_elements::<String>(array, shape),
    }
}

fn empty_with_shape(kind: ElementKind, shape: &[usize]) -> Result<NodeData> {
    match kind {
        ElementKind::Bool => NodeData::from_shape_vec::<bool>(shape, Vec::new()),
        ElementKind::UInt8 => NodeData::from_shape_vec::<u8>(shape, Vec::new()),
        ElementKind::Int32 => NodeData::from_shape_vec::<i32>(shape, Vec::new()),
        ElementKind::Float64 => NodeData::from_shape_vec::<f64>(shape, Vec::new()),
        ElementKind::String => NodeData::from_shape_vec::<String>(shape, Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::file::SeqFile;
    use crate::core::writer::tests::small_writer;
    use crate::var::ReadOptions;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("small.zarr");
        let container = small_writer().into_container().unwrap();

        let metadata = save(&container, &path).unwrap();
        assert!(is_zarr_path(&path));
        assert_eq!(metadata.num_samples, 3);
        assert_eq!(metadata.num_variants, 4);
        assert_eq!(metadata.ploidy, 2);
        assert_eq!(read_metadata(&path).unwrap(), metadata);

        let loaded = load(&path).unwrap();
        for (node, data) in container.iter() {
            assert_eq!(loaded.get(node), Some(data), "{}", node);
        }
        assert_eq!(loaded.node_paths(), container.node_paths());
    }

    #[test]
    fn test_open_path_reads_like_memory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("small.zarr");
        save(&small_writer().into_container().unwrap(), &path).unwrap();

        let mut file = SeqFile::open_path(&path).unwrap();
        assert_eq!(file.num_variants(), 4);
        let keys = file
            .read_var("$chrom_pos", &ReadOptions::default())
            .unwrap();
        assert_eq!(
            keys.data().to_text(),
            vec!["chr1:100", "chr1:200", "chr2:100", "chr2:100_1"]
        );
    }

    #[test]
    fn test_empty_and_logical_nodes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("odd.zarr");
        let mut c = MemoryContainer::new();
        c.insert("flags", NodeData::from_vec(vec![true, false, true]));
        c.insert("none", NodeData::empty(ElementKind::Int32, &[3]));
        c.insert(
            "deep/nested/text",
            NodeData::from_vec(vec!["a".to_string(), String::new()]),
        );
        c.insert("qual", NodeData::from_vec(vec![1.5, f64::NAN]));
        save(&c, &path).unwrap();

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.get("flags"), c.get("flags"));
        assert_eq!(loaded.get("none").unwrap().shape(), &[0, 3]);
        assert_eq!(loaded.get("deep/nested/text"), c.get("deep/nested/text"));
        let qual = loaded.get("qual").unwrap().to_vec::<f64>().unwrap();
        assert_eq!(qual[0], 1.5);
        assert!(qual[1].is_nan());
    }

    #[test]
    fn test_chunk_grid_rejects_zero_extent() {
        assert!(chunk_grid(&[4096, 3, 2]).is_ok());
        let err = chunk_grid(&[4, 0]).unwrap_err();
        assert!(err.to_string().contains("zero extent"));
    }

    #[test]
    fn test_refuses_existing_output() {
        let dir = TempDir::new().unwrap();
        let err = save(&MemoryContainer::new(), dir.path()).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_load_rejects_plain_directory() {
        let dir = TempDir::new().unwrap();
        assert!(!is_zarr_path(dir.path()));
        assert!(load(dir.path()).is_err());
    }
}
