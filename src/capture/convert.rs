//! Frame -> packed detector input conversion

use std::borrow::Cow;

use bytes::Bytes;
use tracing::{instrument, trace};

use super::frame::{Frame, PixelFormat, PlaneLayout};
use crate::error::ConvertError;

/// Layout of a packed detector input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackedFormat {
    /// Full-res luma followed by interleaved V/U at half resolution
    Nv21,
    /// 4 bytes per pixel, rows tightly packed
    Rgba,
}

/// Contiguous pixel buffer in the layout a detector consumes
#[derive(Debug, Clone)]
pub struct PackedImage {
    pub format: PackedFormat,
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
}

impl PackedImage {
    pub fn nv21(data: Bytes, width: u32, height: u32) -> Self {
        Self {
            format: PackedFormat::Nv21,
            width,
            height,
            data,
        }
    }

    pub fn rgba(data: Bytes, width: u32, height: u32) -> Self {
        Self {
            format: PackedFormat::Rgba,
            width,
            height,
            data,
        }
    }

    /// 8-bit grayscale view, borrowed when the format already carries one
    pub fn luma(&self) -> Cow<'_, [u8]> {
        let pixels = (self.width as usize).saturating_mul(self.height as usize);
        match self.format {
            PackedFormat::Nv21 => Cow::Borrowed(&self.data[..pixels.min(self.data.len())]),
            PackedFormat::Rgba => Cow::Owned(
                self.data
                    .chunks_exact(4)
                    .take(pixels)
                    .map(|px| {
                        // ITU-R BT.601 weights in 8-bit fixed point
                        let (r, g, b) = (px[0] as u32, px[1] as u32, px[2] as u32);
                        ((77 * r + 150 * g + 29 * b) >> 8) as u8
                    })
                    .collect(),
            ),
        }
    }
}

/// Result of a conversion
#[derive(Debug)]
pub struct Converted {
    pub image: PackedImage,
    /// The packed image shares the frame's buffer, so the frame must stay
    /// alive until the detector is done with it
    pub aliases_frame: bool,
}

impl Converted {
    fn copied(image: PackedImage) -> Self {
        Self {
            image,
            aliases_frame: false,
        }
    }

    fn aliased(image: PackedImage) -> Self {
        Self {
            image,
            aliases_frame: true,
        }
    }
}

/// Converts a frame into the packed layout the detector expects.
#[instrument(skip(frame), fields(seq = frame.sequence(), format = ?frame.format()))]
pub fn convert(frame: &Frame) -> Result<Converted, ConvertError> {
    let format = frame.format();
    let (width, height) = (frame.width(), frame.height());
    if width == 0 || height == 0 {
        return Err(ConvertError::InvalidGeometry {
            width,
            height,
            format,
        });
    }
    if frame.planes.len() < format.plane_count() {
        return Err(ConvertError::PlaneCount {
            format,
            expected: format.plane_count(),
            actual: frame.planes.len(),
        });
    }

    let converted = match format {
        PixelFormat::Yuv420Planar => {
            require_even(width, height, format)?;
            let [y, u, v] = [frame.planes[0], frame.planes[1], frame.planes[2]];
            Converted::copied(PackedImage::nv21(
                yuv420_planar_to_nv21(&frame.data, width, height, y, u, v)?.into(),
                width,
                height,
            ))
        }
        PixelFormat::Yuv420SemiPlanar => {
            require_even(width, height, format)?;
            semi_planar_to_nv21(&frame.data, width, height, frame.planes[0], frame.planes[1])?
        }
        PixelFormat::Rgb32 => rgb32_to_rgba(&frame.data, width, height, frame.planes[0])?,
        PixelFormat::Yuyv422 => {
            require_even(width, height, format)?;
            Converted::copied(PackedImage::nv21(
                yuyv_to_nv21(&frame.data, width, height, frame.planes[0])?.into(),
                width,
                height,
            ))
        }
    };
    trace!(len = converted.image.data.len(), aliased = converted.aliases_frame, "converted");
    Ok(converted)
}

fn invalid_geometry(width: u32, height: u32, format: PixelFormat) -> ConvertError {
    ConvertError::InvalidGeometry {
        width,
        height,
        format,
    }
}

fn require_even(width: u32, height: u32, format: PixelFormat) -> Result<(), ConvertError> {
    if width % 2 != 0 || height % 2 != 0 {
        return Err(invalid_geometry(width, height, format));
    }
    Ok(())
}

/// Byte length of a `width` x `height` image at `num / den` bytes per pixel
fn image_len(width: u32, height: u32, num: usize, den: usize, format: PixelFormat) -> Result<usize, ConvertError> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|pixels| pixels.checked_mul(num))
        .map(|bytes| bytes / den)
        .ok_or_else(|| invalid_geometry(width, height, format))
}

/// True when every sample of `row` lies inside the buffer
fn row_available(len: usize, plane: &PlaneLayout, row: usize, samples: usize) -> bool {
    samples == 0 || plane.checked_index(row, samples - 1).is_some_and(|last| last < len)
}

fn too_short(len: usize, plane_idx: usize, plane: &PlaneLayout, row: usize, samples: usize) -> ConvertError {
    ConvertError::PlaneTooShort {
        plane: plane_idx,
        row,
        needed: plane
            .checked_index(row, samples.saturating_sub(1))
            .map_or(usize::MAX, |last| last.saturating_add(1)),
        available: len,
    }
}

/// Checks that all `rows` rows of a plane are in the buffer and do not
/// overlap. Runs before any output is allocated, which bounds the output
/// by the input length.
fn check_plane(
    len: usize,
    plane_idx: usize,
    plane: &PlaneLayout,
    rows: usize,
    samples: usize,
) -> Result<(), ConvertError> {
    if rows == 0 || samples == 0 {
        return Ok(());
    }
    let span = (samples - 1)
        .checked_mul(plane.pixel_stride.max(1))
        .and_then(|s| s.checked_add(1))
        .unwrap_or(usize::MAX);
    if rows > 1 && plane.row_stride < span {
        return Err(ConvertError::RowStride {
            plane: plane_idx,
            row_stride: plane.row_stride,
            span,
        });
    }
    let fits = |row: usize| {
        row.checked_mul(plane.row_stride)
            .and_then(|start| start.checked_add(plane.offset))
            .and_then(|start| start.checked_add(span))
            .is_some_and(|end| end <= len)
    };
    if fits(rows - 1) {
        return Ok(());
    }
    let row = (0..rows).find(|&row| !fits(row)).unwrap_or(rows - 1);
    Err(too_short(len, plane_idx, plane, row, samples))
}

/// Copies `height` rows of `width` samples, dropping stride padding
fn copy_rows(
    src: &[u8],
    plane_idx: usize,
    plane: &PlaneLayout,
    width: usize,
    height: usize,
    dst: &mut [u8],
) -> Result<(), ConvertError> {
    for row in 0..height {
        if !row_available(src.len(), plane, row, width) {
            return Err(too_short(src.len(), plane_idx, plane, row, width));
        }
        let out = &mut dst[row * width..(row + 1) * width];
        if plane.pixel_stride == 1 {
            let start = plane.index(row, 0);
            out.copy_from_slice(&src[start..start + width]);
        } else {
            for (col, sample) in out.iter_mut().enumerate() {
                *sample = src[plane.index(row, col)];
            }
        }
    }
    Ok(())
}

/// Picks the source row for chroma row `row`.
///
/// Camera planes often stop right after the last sample the driver wrote,
/// so a final row the buffer does not hold is replicated from the row above.
fn chroma_source_row(
    len: usize,
    plane_idx: usize,
    plane: &PlaneLayout,
    row: usize,
    rows: usize,
    samples: usize,
) -> Result<usize, ConvertError> {
    if row_available(len, plane, row, samples) {
        return Ok(row);
    }
    if row + 1 == rows && row > 0 && row_available(len, plane, row - 1, samples) {
        trace!(plane = plane_idx, row, "replicating last chroma row");
        return Ok(row - 1);
    }
    Err(too_short(len, plane_idx, plane, row, samples))
}

/// Planar YUV 4:2:0 with arbitrary strides -> NV21.
pub fn yuv420_planar_to_nv21(
    data: &[u8],
    width: u32,
    height: u32,
    y: PlaneLayout,
    u: PlaneLayout,
    v: PlaneLayout,
) -> Result<Vec<u8>, ConvertError> {
    let (w, h) = (width as usize, height as usize);
    let packed_len = image_len(width, height, 3, 2, PixelFormat::Yuv420Planar)?;
    check_plane(data.len(), 0, &y, h, w)?;
    let mut nv21 = vec![0u8; packed_len];
    copy_rows(data, 0, &y, w, h, &mut nv21[..w * h])?;

    let (chroma_w, chroma_h) = (w / 2, h / 2);
    for row in 0..chroma_h {
        let u_row = chroma_source_row(data.len(), 1, &u, row, chroma_h, chroma_w)?;
        let v_row = chroma_source_row(data.len(), 2, &v, row, chroma_h, chroma_w)?;
        let dst = w * h + row * w;
        for col in 0..chroma_w {
            nv21[dst + 2 * col] = data[v.index(v_row, col)];
            nv21[dst + 2 * col + 1] = data[u.index(u_row, col)];
        }
    }
    Ok(nv21)
}

/// NV21 in one buffer. Tightly packed input is passed through without a copy.
fn semi_planar_to_nv21(
    data: &Bytes,
    width: u32,
    height: u32,
    y: PlaneLayout,
    vu: PlaneLayout,
) -> Result<Converted, ConvertError> {
    let (w, h) = (width as usize, height as usize);
    let packed_len = image_len(width, height, 3, 2, PixelFormat::Yuv420SemiPlanar)?;
    let tight = y.offset == 0 && y.row_stride == w && vu.offset == w * h && vu.row_stride == w;
    if tight && data.len() >= packed_len {
        return Ok(Converted::aliased(PackedImage::nv21(
            data.slice(..packed_len),
            width,
            height,
        )));
    }

    check_plane(data.len(), 0, &y, h, w)?;
    let mut nv21 = vec![0u8; packed_len];
    copy_rows(data, 0, &y, w, h, &mut nv21[..w * h])?;

    // a VU row is w/2 interleaved pairs, so it ends w bytes after its start
    let vu = PlaneLayout::new(vu.offset, vu.row_stride, 1);
    let chroma_h = h / 2;
    for row in 0..chroma_h {
        let src_row = chroma_source_row(data.len(), 1, &vu, row, chroma_h, w)?;
        let start = vu.offset + src_row * vu.row_stride;
        let dst = w * h + row * w;
        nv21[dst..dst + w].copy_from_slice(&data[start..start + w]);
    }
    Ok(Converted::copied(PackedImage::nv21(nv21.into(), width, height)))
}

fn rgb32_to_rgba(
    data: &Bytes,
    width: u32,
    height: u32,
    plane: PlaneLayout,
) -> Result<Converted, ConvertError> {
    let (w, h) = (width as usize, height as usize);
    let packed_len = image_len(width, height, 4, 1, PixelFormat::Rgb32)?;
    let row_bytes = packed_len / h;
    if plane.offset == 0 && plane.row_stride == row_bytes && data.len() >= packed_len {
        return Ok(Converted::aliased(PackedImage::rgba(
            data.slice(..packed_len),
            width,
            height,
        )));
    }

    // rows are copied as byte runs, so the stride is read per byte
    let bytes = PlaneLayout::new(plane.offset, plane.row_stride, 1);
    check_plane(data.len(), 0, &bytes, h, row_bytes)?;
    let mut rgba = vec![0u8; packed_len];
    copy_rows(data, 0, &bytes, row_bytes, h, &mut rgba)?;
    Ok(Converted::copied(PackedImage::rgba(rgba.into(), width, height)))
}

/// Packed YUYV 4:2:2 -> NV21, chroma taken from even rows
pub fn yuyv_to_nv21(
    data: &[u8],
    width: u32,
    height: u32,
    plane: PlaneLayout,
) -> Result<Vec<u8>, ConvertError> {
    let (w, h) = (width as usize, height as usize);
    let packed_len = image_len(width, height, 3, 2, PixelFormat::Yuyv422)?;
    let bytes = PlaneLayout::new(plane.offset, plane.row_stride, 1);
    check_plane(data.len(), 0, &bytes, h, w * 2)?;
    let mut nv21 = vec![0u8; packed_len];

    for row in 0..h {
        if !row_available(data.len(), &bytes, row, w * 2) {
            return Err(too_short(data.len(), 0, &bytes, row, w * 2));
        }
        let start = bytes.index(row, 0);
        let line = &data[start..start + w * 2];
        for (col, luma) in nv21[row * w..(row + 1) * w].iter_mut().enumerate() {
            *luma = line[col * 2];
        }
        if row % 2 == 0 {
            let dst = w * h + (row / 2) * w;
            for pair in 0..w / 2 {
                nv21[dst + 2 * pair] = line[pair * 4 + 3];
                nv21[dst + 2 * pair + 1] = line[pair * 4 + 1];
            }
        }
    }
    Ok(nv21)
}
