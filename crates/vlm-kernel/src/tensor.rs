//! Minimal tensor and image containers exchanged with the runtime.
//!
//! These carry just enough structure for the worker to do its own job
//! (build warm-up inputs, find the prompt length, slice generated tokens).
//! Everything else about them is the runtime's business.

use crate::error::{RuntimeError, RuntimeResult};

/// Decoded image, row-major, interleaved channels (RGB8 unless stated).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub data: Vec<u8>,
}

impl RawImage {
    /// Build an image, checking the buffer length against the dimensions.
    pub fn new(width: u32, height: u32, channels: u8, data: Vec<u8>) -> RuntimeResult<Self> {
        let expected = width as usize * height as usize * channels as usize;
        if data.len() != expected {
            return Err(RuntimeError::InvalidInput(format!(
                "image buffer has {} bytes, expected {expected} for {width}x{height}x{channels}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }
}

/// Dense `f32` tensor in `[batch, channels, height, width]` layout.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelTensor {
    pub dims: [usize; 4],
    pub data: Vec<f32>,
}

impl PixelTensor {
    /// Tensor of the given shape filled with `value`.
    pub fn full(dims: [usize; 4], value: f32) -> Self {
        let len = dims.iter().product();
        Self {
            dims,
            data: vec![value; len],
        }
    }

    /// All-zero tensor of the given shape.
    pub fn zeros(dims: [usize; 4]) -> Self {
        Self::full(dims, 0.0)
    }

    pub fn height(&self) -> usize {
        self.dims[2]
    }

    pub fn width(&self) -> usize {
        self.dims[3]
    }
}

/// Vision input accepted by [`Processor::encode`](crate::runtime::Processor::encode).
#[derive(Debug, Clone)]
pub enum ImageInput {
    /// A decoded image that still needs preprocessing
    Image(RawImage),
    /// Already preprocessed pixel values
    Pixels(PixelTensor),
}

impl ImageInput {
    /// `(width, height)` of the input.
    pub fn size(&self) -> (usize, usize) {
        match self {
            ImageInput::Image(img) => (img.width as usize, img.height as usize),
            ImageInput::Pixels(t) => (t.width(), t.height()),
        }
    }
}

/// Token ids in `[batch, sequence]` layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenTensor {
    dims: [usize; 2],
    data: Vec<i64>,
}

impl TokenTensor {
    /// Build from a flat buffer, checking it matches `dims`.
    pub fn new(dims: [usize; 2], data: Vec<i64>) -> RuntimeResult<Self> {
        if dims[0] * dims[1] != data.len() {
            return Err(RuntimeError::InvalidInput(format!(
                "token buffer has {} ids, expected {}x{}",
                data.len(),
                dims[0],
                dims[1]
            )));
        }
        Ok(Self { dims, data })
    }

    /// Build from equally long rows.
    pub fn from_rows(rows: Vec<Vec<i64>>) -> RuntimeResult<Self> {
        let seq = rows.first().map(Vec::len).unwrap_or(0);
        if rows.iter().any(|r| r.len() != seq) {
            return Err(RuntimeError::InvalidInput(
                "token rows have different lengths".into(),
            ));
        }
        let batch = rows.len();
        Ok(Self {
            dims: [batch, seq],
            data: rows.into_iter().flatten().collect(),
        })
    }

    pub fn dims(&self) -> [usize; 2] {
        self.dims
    }

    pub fn batch_size(&self) -> usize {
        self.dims[0]
    }

    /// Length of the sequence axis.
    pub fn seq_len(&self) -> usize {
        self.dims[1]
    }

    /// Iterate rows of the batch.
    pub fn rows(&self) -> impl Iterator<Item = &[i64]> {
        // chunks(0) panics; a zero-length sequence yields empty rows instead
        let seq = self.dims[1];
        (0..self.dims[0]).map(move |b| &self.data[b * seq..(b + 1) * seq])
    }

    /// Keep only the tokens at sequence positions `offset..` of every row.
    ///
    /// An offset past the end yields rows of length zero.
    pub fn slice_from(&self, offset: usize) -> TokenTensor {
        let start = offset.min(self.dims[1]);
        let data: Vec<i64> = self.rows().flat_map(|r| r[start..].iter().copied()).collect();
        TokenTensor {
            dims: [self.dims[0], self.dims[1] - start],
            data,
        }
    }
}

/// Model inputs produced by the processor.
#[derive(Debug, Clone)]
pub struct EncodedInputs {
    /// Prompt token ids (image placeholders included)
    pub input_ids: TokenTensor,
    /// Preprocessed image, if the processor kept it separate
    pub pixel_values: Option<PixelTensor>,
}
