use bytes::Bytes;
use codescan::capture::{convert, Frame, FrameMetadata, PackedFormat, PixelFormat, PlaneLayout};
use codescan::error::ConvertError;

/// 4x4 planar frame: Y rows padded to 6 bytes, U and V interleaved in one
/// plane (pixel stride 2) with 6 byte rows
fn padded_planar(chroma_rows: usize) -> Frame {
    let mut data = Vec::new();
    for r in 0..4u8 {
        data.extend((0..4u8).map(|c| 10 * r + c + 1));
        data.extend([0xAA, 0xAA]);
    }
    for r in 0..chroma_rows as u8 {
        for c in 0..2u8 {
            data.push(100 + 10 * r + c);
            data.push(200 + 10 * r + c);
        }
        data.extend([0xBB, 0xBB]);
    }
    Frame::new(
        Bytes::from(data),
        vec![
            PlaneLayout::new(0, 6, 1),
            PlaneLayout::new(24, 6, 2),
            PlaneLayout::new(25, 6, 2),
        ],
        FrameMetadata::new(1, 4, 4, PixelFormat::Yuv420Planar),
    )
}

const LUMA: [u8; 16] = [1, 2, 3, 4, 11, 12, 13, 14, 21, 22, 23, 24, 31, 32, 33, 34];

#[test]
fn test_stride_padded_planar_yuv_to_nv21() {
    let converted = convert(&padded_planar(2)).unwrap();
    assert!(!converted.aliases_frame);
    assert_eq!(converted.image.format, PackedFormat::Nv21);
    assert_eq!(converted.image.data.len(), 4 * 4 * 3 / 2);

    let data = converted.image.data.as_ref();
    assert_eq!(&data[..16], &LUMA);
    assert_eq!(&data[16..], &[200, 100, 201, 101, 210, 110, 211, 111]);
}

#[test]
fn test_missing_last_chroma_row_is_replicated() {
    // second chroma row absent: buffer ends after the first row's padding
    let converted = convert(&padded_planar(1)).unwrap();
    let data = converted.image.data.as_ref();
    assert_eq!(&data[..16], &LUMA);
    assert_eq!(&data[16..], &[200, 100, 201, 101, 200, 100, 201, 101]);
}

#[test]
fn test_truncated_luma_is_an_error() {
    let frame = padded_planar(2);
    let short = Frame::new(
        frame.data.slice(..10),
        frame.planes.clone(),
        FrameMetadata::new(2, 4, 4, PixelFormat::Yuv420Planar),
    );
    assert!(matches!(
        convert(&short),
        Err(ConvertError::PlaneTooShort { plane: 0, row: 2, .. })
    ));
}

#[test]
fn test_missing_planes_are_reported() {
    let frame = Frame::new(
        Bytes::from(vec![0u8; 24]),
        vec![PlaneLayout::new(0, 4, 1)],
        FrameMetadata::new(1, 4, 4, PixelFormat::Yuv420Planar),
    );
    assert!(matches!(
        convert(&frame),
        Err(ConvertError::PlaneCount {
            expected: 3,
            actual: 1,
            ..
        })
    ));
}

#[test]
fn test_padded_nv21_is_copied_without_padding() {
    // 2x2 NV21 with 4 byte rows
    let data = Bytes::from(vec![1, 2, 0, 0, 3, 4, 0, 0, 9, 8, 0, 0]);
    let frame = Frame::new(
        data,
        vec![PlaneLayout::new(0, 4, 1), PlaneLayout::new(8, 4, 2)],
        FrameMetadata::new(1, 2, 2, PixelFormat::Yuv420SemiPlanar),
    );
    let converted = convert(&frame).unwrap();
    assert!(!converted.aliases_frame);
    assert_eq!(converted.image.data.as_ref(), &[1, 2, 3, 4, 9, 8]);
    assert_eq!(converted.image.luma().as_ref(), &[1, 2, 3, 4]);
}

/// NV21 with 6 byte rows where the buffer ends right after the last VU row
fn unpadded_tail_nv21(height: u32) -> Frame {
    let mut data = Vec::new();
    for r in 0..height as u8 {
        data.extend((0..4u8).map(|c| 10 * r + c + 1));
        data.extend([0xAA, 0xAA]);
    }
    let vu_offset = data.len();
    for r in 0..height as u8 / 2 {
        data.extend((0..4u8).map(|c| 10 * (r + 1) + c));
        if r + 1 < height as u8 / 2 {
            data.extend([0xBB, 0xBB]);
        }
    }
    Frame::new(
        Bytes::from(data),
        vec![PlaneLayout::new(0, 6, 1), PlaneLayout::new(vu_offset, 6, 2)],
        FrameMetadata::new(1, 4, height, PixelFormat::Yuv420SemiPlanar),
    )
}

#[test]
fn test_unpadded_last_vu_row_is_read_not_replicated() {
    let frame = unpadded_tail_nv21(4);
    assert_eq!(frame.data.len(), 24 + 6 + 4);
    let converted = convert(&frame).unwrap();
    let data = converted.image.data.as_ref();
    assert_eq!(&data[..16], &LUMA);
    assert_eq!(&data[16..], &[10, 11, 12, 13, 20, 21, 22, 23]);
}

#[test]
fn test_two_row_nv21_without_trailing_padding() {
    let frame = unpadded_tail_nv21(2);
    assert_eq!(frame.data.len(), 16);
    let converted = convert(&frame).unwrap();
    assert_eq!(
        converted.image.data.as_ref(),
        &[1, 2, 3, 4, 11, 12, 13, 14, 10, 11, 12, 13]
    );
}

#[test]
fn test_overflowing_dimensions_are_invalid_geometry() {
    let frame = Frame::new(
        Bytes::from(vec![0u8; 64]),
        vec![
            PlaneLayout::new(0, 4_000_000_000, 1),
            PlaneLayout::new(32, 2_000_000_000, 1),
            PlaneLayout::new(48, 2_000_000_000, 1),
        ],
        FrameMetadata::new(1, 4_000_000_000, 4_000_000_000, PixelFormat::Yuv420Planar),
    );
    assert!(matches!(
        convert(&frame),
        Err(ConvertError::InvalidGeometry {
            width: 4_000_000_000,
            ..
        })
    ));
}

#[test]
fn test_large_frame_is_checked_before_allocating() {
    // fits usize, but the 64 byte buffer holds one luma row at most
    let frame = Frame::new(
        Bytes::from(vec![0u8; 64]),
        vec![PlaneLayout::new(0, 60_000, 1), PlaneLayout::new(32, 60_000, 2)],
        FrameMetadata::new(1, 60_000, 60_000, PixelFormat::Yuv420SemiPlanar),
    );
    assert!(matches!(
        convert(&frame),
        Err(ConvertError::PlaneTooShort { plane: 0, row: 0, .. })
    ));
}

#[test]
fn test_overlapping_rows_are_rejected() {
    let frame = Frame::new(
        Bytes::from(vec![0u8; 64]),
        vec![PlaneLayout::new(0, 2, 1), PlaneLayout::new(32, 4, 2)],
        FrameMetadata::new(1, 4, 4, PixelFormat::Yuv420SemiPlanar),
    );
    assert!(matches!(
        convert(&frame),
        Err(ConvertError::RowStride {
            plane: 0,
            row_stride: 2,
            span: 4
        })
    ));
}
