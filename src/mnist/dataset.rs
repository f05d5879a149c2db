use crate::backend::Element;
use anyhow::{Context, bail, ensure};
use burn_dataset::network::downloader::download_file_as_bytes;
use burn_dataset::{
    Dataset, InMemDataset,
    transform::{Mapper, MapperDataset},
};
use flate2::read::GzDecoder;
use num_traits::AsPrimitive;
use serde::{Deserialize, Serialize};
use std::fs::{File, create_dir_all};
use std::path::{Path, PathBuf};

// adapted from the burn-dataset vision source, which is not enabled here
// because the "vision" feature pulls in considerably more dependencies

// CVDF mirror of http://yann.lecun.com/exdb/mnist/
const URL: &str = "https://storage.googleapis.com/cvdf-datasets/mnist/";

const IMAGES_MAGIC: u32 = 2051;
const LABELS_MAGIC: u32 = 2049;

pub const WIDTH: usize = 28;
pub const HEIGHT: usize = 28;

/// Which half of MNIST to load.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Split {
    /// 60,000 images.
    Train,
    /// 10,000 images.
    Test,
}

impl Split {
    pub fn name(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Test => "test",
        }
    }

    pub fn images_file(&self) -> &'static str {
        match self {
            Split::Train => "train-images-idx3-ubyte",
            Split::Test => "t10k-images-idx3-ubyte",
        }
    }

    pub fn labels_file(&self) -> &'static str {
        match self {
            Split::Train => "train-labels-idx1-ubyte",
            Split::Test => "t10k-labels-idx1-ubyte",
        }
    }
}

/// MNIST item.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct MnistItem {
    /// Image as a flat array of floats, row-major.
    /// Each value is a brightness, in between 0.0 and 255.0.
    ///
    /// # Shape
    /// [HEIGHT * WIDTH]
    pub image: Vec<Element>,

    /// Label of the image.
    /// Each value is in between 0 and 9.
    pub label: u8,
}

#[derive(Deserialize, Debug, Clone)]
struct MnistItemRaw {
    pub image_bytes: Vec<u8>,
    pub label: u8,
}

struct BytesToImage;

impl Mapper<MnistItemRaw, MnistItem> for BytesToImage {
    fn map(&self, item: &MnistItemRaw) -> MnistItem {
        debug_assert_eq!(item.image_bytes.len(), WIDTH * HEIGHT);

        let image: Vec<Element> = item
            .image_bytes
            .iter()
            .map(|brightness| {
                let element: Element = (*brightness).as_();
                element
            })
            .collect();

        MnistItem {
            image,
            label: item.label,
        }
    }
}

type MappedDataset = MapperDataset<InMemDataset<MnistItemRaw>, BytesToImage, MnistItemRaw>;

enum Inner {
    Raw(MappedDataset),
    Items(InMemDataset<MnistItem>),
}

/// The MNIST dataset consists of 70,000 28x28 grayscale images of handwritten digits, in 10 classes.
/// There are 60,000 training images and 10,000 test images.
///
/// The data is downloaded from the [CVDF mirror](https://github.com/cvdfoundation/mnist)
/// and cached under `~/.cache/burn-dataset/mnist`.
pub struct MnistDataset {
    inner: Inner,
}

impl Dataset<MnistItem> for MnistDataset {
    fn get(&self, index: usize) -> Option<MnistItem> {
        match &self.inner {
            Inner::Raw(dataset) => dataset.get(index),
            Inner::Items(dataset) => dataset.get(index),
        }
    }

    fn len(&self) -> usize {
        match &self.inner {
            Inner::Raw(dataset) => dataset.len(),
            Inner::Items(dataset) => dataset.len(),
        }
    }
}

impl MnistDataset {
    /// Creates the train dataset, downloading it if needed.
    pub fn train() -> anyhow::Result<Self> {
        Self::new(Split::Train)
    }

    /// Creates the test dataset, downloading it if needed.
    pub fn test() -> anyhow::Result<Self> {
        Self::new(Split::Test)
    }

    fn new(split: Split) -> anyhow::Result<Self> {
        let root = Self::download(split)?;
        Self::from_dir(&root, split)
    }

    /// Loads a split from a directory already containing the decompressed idx files.
    pub fn from_dir(root: &Path, split: Split) -> anyhow::Result<Self> {
        // MNIST is tiny so it's kept in-memory
        // Train images (u8): 28 * 28 * 60000 = 47.04Mb
        // Test images (u8): 28 * 28 * 10000 = 7.84Mb
        let images = read_images(&root.join(split.images_file()))?;
        let labels = read_labels(&root.join(split.labels_file()))?;
        ensure!(
            images.len() == labels.len(),
            "{} split has {} images but {} labels",
            split.name(),
            images.len(),
            labels.len()
        );
        log::info!("loaded {} {} items", images.len(), split.name());

        let items: Vec<_> = images
            .into_iter()
            .zip(labels)
            .map(|(image_bytes, label)| MnistItemRaw { image_bytes, label })
            .collect();

        let dataset = InMemDataset::new(items);
        let dataset = MapperDataset::new(dataset, BytesToImage);

        Ok(Self {
            inner: Inner::Raw(dataset),
        })
    }

    /// Wraps already decoded items.
    pub fn from_items(items: Vec<MnistItem>) -> Self {
        Self {
            inner: Inner::Items(InMemDataset::new(items)),
        }
    }

    /// Downloads the split files into the cache directory, skipping files already present.
    fn download(split: Split) -> anyhow::Result<PathBuf> {
        let cache_dir = dirs::home_dir()
            .context("could not get the home directory")?
            .join(".cache")
            .join("burn-dataset");
        let split_dir = cache_dir.join("mnist").join(split.name());

        if !split_dir.exists() {
            create_dir_all(&split_dir)
                .with_context(|| format!("failed to create {split_dir:?}"))?;
        }

        download_file(split.images_file(), &split_dir)?;
        download_file(split.labels_file(), &split_dir)?;

        Ok(split_dir)
    }
}

/// Downloads `{name}.gz` from the mirror and writes it decompressed into `dest_dir`.
fn download_file(name: &str, dest_dir: &Path) -> anyhow::Result<PathBuf> {
    let file_name = dest_dir.join(name);

    if !file_name.exists() {
        let bytes = download_file_as_bytes(&format!("{URL}{name}.gz"), name);

        let mut output_file =
            File::create(&file_name).with_context(|| format!("failed to create {file_name:?}"))?;

        let mut gz_buffer = GzDecoder::new(&bytes[..]);
        if let Err(err) = std::io::copy(&mut gz_buffer, &mut output_file) {
            // don't leave a truncated file behind, it would be picked up next time
            std::fs::remove_file(&file_name).ok();
            return Err(err).with_context(|| format!("failed to decompress {name}.gz"));
        }
    }

    Ok(file_name)
}

fn read_images(path: &Path) -> anyhow::Result<Vec<Vec<u8>>> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {path:?}"))?;
    parse_images(&bytes).with_context(|| format!("invalid image file {path:?}"))
}

fn read_labels(path: &Path) -> anyhow::Result<Vec<u8>> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {path:?}"))?;
    parse_labels(&bytes).with_context(|| format!("invalid label file {path:?}"))
}

fn be_u32(bytes: &[u8], offset: usize) -> anyhow::Result<u32> {
    let Some(word) = bytes.get(offset..offset + 4) else {
        bail!("truncated header ({} bytes)", bytes.len());
    };
    Ok(u32::from_be_bytes([word[0], word[1], word[2], word[3]]))
}

/// Parses an idx3 image file: a 16-byte header (magic, count, rows, cols) followed by the pixels.
pub(crate) fn parse_images(bytes: &[u8]) -> anyhow::Result<Vec<Vec<u8>>> {
    let magic = be_u32(bytes, 0)?;
    ensure!(magic == IMAGES_MAGIC, "unexpected magic number {magic}");
    let count = be_u32(bytes, 4)? as usize;
    let rows = be_u32(bytes, 8)? as usize;
    let cols = be_u32(bytes, 12)? as usize;
    ensure!(
        rows == HEIGHT && cols == WIDTH,
        "unexpected image size {rows}x{cols}"
    );

    let payload = &bytes[16..];
    ensure!(
        payload.len() == count * HEIGHT * WIDTH,
        "expected {count} images but got {} bytes of pixels",
        payload.len()
    );

    Ok(payload
        .chunks(HEIGHT * WIDTH)
        .map(|chunk| chunk.to_vec())
        .collect())
}

/// Parses an idx1 label file: an 8-byte header (magic, count) followed by the labels.
pub(crate) fn parse_labels(bytes: &[u8]) -> anyhow::Result<Vec<u8>> {
    let magic = be_u32(bytes, 0)?;
    ensure!(magic == LABELS_MAGIC, "unexpected magic number {magic}");
    let count = be_u32(bytes, 4)? as usize;

    let payload = &bytes[8..];
    ensure!(
        payload.len() == count,
        "expected {count} labels but got {} bytes",
        payload.len()
    );
    if let Some(label) = payload.iter().find(|label| **label > 9) {
        bail!("label {label} is out of range");
    }

    Ok(payload.to_vec())
}
