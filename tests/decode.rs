use std::borrow::Cow;

use gifcache::{
    decode, ColorOutput, DisposalMethod, Encoder, GifDecoder, HasParameters, IndexedFrame,
    ParseEvent, Status, Strictness, Version,
};

const PALETTE: [u8; 12] = [
    0, 0, 0, // black
    255, 0, 0, // red
    0, 255, 0, // green
    0, 0, 255, // blue
];

const BLACK: [u8; 4] = [0, 0, 0, 255];
const RED: [u8; 4] = [255, 0, 0, 255];
const GREEN: [u8; 4] = [0, 255, 0, 255];
const BLUE: [u8; 4] = [0, 0, 255, 255];

fn encode(width: u16, height: u16, loops: Option<u16>, frames: &[IndexedFrame<'_>]) -> Vec<u8> {
    let mut data = Vec::new();
    {
        let mut encoder = Encoder::new(&mut data, width, height);
        encoder.write_global_palette(&PALETTE).unwrap();
        if let Some(count) = loops {
            encoder.write_loop_count(count).unwrap();
        }
        for frame in frames {
            encoder.write_frame(frame).unwrap();
        }
    }
    data
}

fn sub_frame(left: u16, top: u16, width: u16, height: u16, indices: Vec<u8>) -> IndexedFrame<'static> {
    IndexedFrame {
        left,
        top,
        width,
        height,
        buffer: Cow::Owned(indices),
        ..IndexedFrame::default()
    }
}

fn rgba(indices: &[u8]) -> Vec<u8> {
    indices
        .iter()
        .flat_map(|&i| {
            let o = i as usize * 3;
            [PALETTE[o], PALETTE[o + 1], PALETTE[o + 2], 0xFF]
        })
        .collect()
}

#[test]
fn single_frame_matches_reference_bitmap() {
    let indices: Vec<u8> = (0..6 * 5).map(|i| (i % 4) as u8).collect();
    let mut frame = sub_frame(0, 0, 6, 5, indices.clone());
    frame.palette = Some(PALETTE.to_vec());
    let data = encode(6, 5, None, &[frame]);

    let mut decoder = GifDecoder::new();
    assert_eq!(decoder.decode_bytes(&data), Status::Finished);
    assert_eq!(decoder.version(), Some(Version::V89a));
    assert_eq!(decoder.frame_count(), 1);
    let decoded = &decoder.frames()[0];
    assert_eq!(decoded.buffer.len(), 6 * 5 * 4);
    assert_eq!(decoded.buffer, rgba(&indices));
    assert_eq!(decoded.delay, 0);
}

#[test]
fn frames_delays_and_loops() {
    let mut first = sub_frame(0, 0, 2, 2, vec![1; 4]);
    first.delay = 10;
    let mut second = sub_frame(0, 0, 2, 2, vec![2; 4]);
    second.delay = 25;
    let data = encode(2, 2, Some(0), &[first, second]);

    let mut anim = decode(&data);
    assert_eq!(anim.status(), Status::Finished);
    assert_eq!(anim.loop_count(), 0);
    assert_eq!(anim.delays(), [100, 250]);
    assert_eq!(anim.total_duration(), 350);
    assert_eq!(anim.next_frame().map(|f| f.pixel(0, 0)), Some(Some(RED)));
    assert_eq!(anim.next_frame().map(|f| f.pixel(0, 0)), Some(Some(GREEN)));
    assert_eq!(anim.next_frame().map(|f| f.pixel(0, 0)), Some(Some(RED)));
}

#[test]
fn background_disposal_clears_previous_area() {
    let mut first = sub_frame(0, 0, 4, 4, vec![1; 16]);
    first.dispose = DisposalMethod::Background;
    let second = sub_frame(0, 0, 2, 2, vec![2; 4]);
    let data = encode(4, 4, None, &[first, second]);

    let anim = decode(&data);
    assert_eq!(anim.len(), 2);
    let composed = anim.frame(1).unwrap();
    assert_eq!(composed.pixel(0, 0), Some(GREEN));
    assert_eq!(composed.pixel(1, 1), Some(GREEN));
    // the background index is 0, black
    assert_eq!(composed.pixel(3, 3), Some(BLACK));
    assert_eq!(composed.pixel(2, 0), Some(BLACK));
}

#[test]
fn background_disposal_after_transparency_clears_to_transparent() {
    let mut first = sub_frame(0, 0, 4, 4, vec![1; 16]);
    first.dispose = DisposalMethod::Background;
    first.transparent = Some(3);
    let second = sub_frame(0, 0, 2, 2, vec![2; 4]);
    let data = encode(4, 4, None, &[first, second]);

    let anim = decode(&data);
    assert_eq!(anim.frame(1).unwrap().pixel(3, 3), Some([0, 0, 0, 0]));
}

#[test]
fn background_without_global_table_is_transparent() {
    let mut first = sub_frame(0, 0, 2, 2, vec![1; 4]);
    first.palette = Some(PALETTE.to_vec());
    first.dispose = DisposalMethod::Background;
    let mut second = sub_frame(0, 0, 1, 1, vec![2]);
    second.palette = Some(PALETTE.to_vec());

    let mut data = Vec::new();
    {
        let mut encoder = Encoder::new(&mut data, 2, 2);
        encoder.write_frame(&first).unwrap();
        encoder.write_frame(&second).unwrap();
    }
    let anim = decode(&data);
    assert_eq!(anim.status(), Status::Finished);
    assert_eq!(anim.frame(1).unwrap().pixel(0, 0), Some(GREEN));
    assert_eq!(anim.frame(1).unwrap().pixel(1, 1), Some([0, 0, 0, 0]));
}

#[test]
fn transparent_background_index_clears_later_disposals() {
    // index 0 is both the background and the first frame's transparent index
    let mut first = sub_frame(0, 0, 2, 2, vec![1; 4]);
    first.transparent = Some(0);
    let mut second = sub_frame(0, 0, 2, 2, vec![3; 4]);
    second.dispose = DisposalMethod::Background;
    let third = sub_frame(0, 0, 1, 1, vec![2]);
    let anim = decode(&encode(2, 2, None, &[first, second, third]));
    assert_eq!(anim.len(), 3);
    assert_eq!(anim.frame(1).unwrap().pixel(1, 1), Some(BLUE));
    assert_eq!(anim.frame(2).unwrap().pixel(1, 1), Some([0, 0, 0, 0]));
}

#[test]
fn keep_disposal_carries_canvas() {
    let first = sub_frame(0, 0, 3, 3, vec![1; 9]);
    let second = sub_frame(1, 1, 1, 1, vec![3]);
    let anim = decode(&encode(3, 3, None, &[first, second]));
    let composed = anim.frame(1).unwrap();
    assert_eq!(composed.pixel(0, 0), Some(RED));
    assert_eq!(composed.pixel(1, 1), Some(BLUE));
    assert_eq!(composed.rect.left, 1);
}

#[test]
fn previous_disposal_restores_older_canvas() {
    let first = sub_frame(0, 0, 4, 4, vec![1; 16]);
    let mut second = sub_frame(0, 0, 2, 2, vec![2; 4]);
    second.dispose = DisposalMethod::Previous;
    let third = sub_frame(3, 3, 1, 1, vec![3]);
    let anim = decode(&encode(4, 4, None, &[first, second, third]));
    assert_eq!(anim.len(), 3);

    let mut expected = anim.frame(0).unwrap().buffer.clone();
    let o = (3 * 4 + 3) * 4;
    expected[o..o + 4].copy_from_slice(&BLUE);
    assert_eq!(anim.frame(2).unwrap().buffer, expected);
}

#[test]
fn interlaced_and_progressive_decode_alike() {
    let (width, height) = (5u16, 11u16);
    let indices: Vec<u8> = (0..width as usize * height as usize)
        .map(|i| ((i / width as usize) % 4) as u8)
        .collect();
    let plain = sub_frame(0, 0, width, height, indices.clone());
    let mut interlaced = sub_frame(0, 0, width, height, indices.clone());
    interlaced.interlaced = true;

    let a = decode(&encode(width, height, None, &[plain]));
    let b = decode(&encode(width, height, None, &[interlaced]));
    assert!(b.frame(0).unwrap().interlaced);
    assert_eq!(a.frame(0).unwrap().buffer, b.frame(0).unwrap().buffer);
    assert_eq!(a.frame(0).unwrap().buffer, rgba(&indices));
}

#[test]
fn non_gif_input_fails_without_frames() {
    for input in [&b"\x89PNG\r\n\x1a\n"[..], &b""[..], &b"GI"[..], &[0u8; 64][..]] {
        let mut decoder = GifDecoder::new();
        let status = decoder.decode_bytes(input);
        assert_eq!(status, Status::FormatError);
        assert_eq!(decoder.frame_count(), 0);
    }
}

#[test]
fn truncated_stream_keeps_complete_frames() {
    let data = encode(
        2,
        2,
        None,
        &[sub_frame(0, 0, 2, 2, vec![1; 4]), sub_frame(0, 0, 2, 2, vec![2; 4])],
    );
    // cut inside the second image descriptor
    let cut = data.len() - 12;
    let anim = decode(&data[..cut]);
    assert_eq!(anim.status(), Status::FormatError);
    assert_eq!(anim.len(), 1);
    assert_eq!(anim.frame(0).unwrap().pixel(1, 1), Some(RED));
}

#[test]
fn strict_rejects_unknown_version() {
    let mut data = encode(1, 1, None, &[sub_frame(0, 0, 1, 1, vec![1])]);
    data[3..6].copy_from_slice(b"90z");

    let mut decoder = GifDecoder::new();
    assert_eq!(decoder.decode_bytes(&data), Status::Finished);
    assert_eq!(decoder.version(), Some(Version::Unknown(*b"90z")));

    decoder.set(Strictness::Strict);
    assert_eq!(decoder.decode_bytes(&data), Status::FormatError);
}

#[test]
fn indexed_output_round_trips_through_encoder() {
    let indices: Vec<u8> = (0..16).map(|i| (i % 3) as u8).collect();
    let data = encode(4, 4, None, &[sub_frame(0, 0, 4, 4, indices.clone())]);

    let mut decoder = GifDecoder::new();
    decoder.set(ColorOutput::Indexed);
    decoder.decode_bytes(&data);
    let frame = &decoder.frames()[0];
    assert_eq!(frame.indices.as_deref(), Some(&indices[..]));
    assert_eq!(frame.palette.as_deref(), Some(&PALETTE[..]));

    let mut copy = Vec::new();
    {
        let mut encoder = Encoder::new(&mut copy, 4, 4);
        let mut again = IndexedFrame::from_indices(4, 4, frame.indices.as_deref().unwrap());
        again.palette = frame.palette.clone();
        encoder.write_frame(&again).unwrap();
    }
    assert_eq!(decode(&copy).frame(0).unwrap().buffer, frame.buffer);
}

#[test]
fn quantized_frame_keeps_colors() {
    let mut pixels = Vec::new();
    for i in 0..16 * 16 {
        pixels.extend_from_slice(if i % 2 == 0 { &RED } else { &BLUE });
    }
    let frame = IndexedFrame::from_rgba(16, 16, &mut pixels);
    let mut data = Vec::new();
    {
        let mut encoder = Encoder::new(&mut data, 16, 16);
        encoder.write_frame(&frame).unwrap();
    }
    let anim = decode(&data);
    assert_eq!(anim.status(), Status::Finished);
    let red = anim.frame(0).unwrap().pixel(0, 0).unwrap();
    let blue = anim.frame(0).unwrap().pixel(1, 0).unwrap();
    assert!(red[0] > 200 && red[2] < 55, "{:?}", red);
    assert!(blue[2] > 200 && blue[0] < 55, "{:?}", blue);
}

#[test]
fn listener_reports_every_frame() {
    let data = encode(
        1,
        1,
        None,
        &[sub_frame(0, 0, 1, 1, vec![1]), sub_frame(0, 0, 1, 1, vec![2])],
    );
    let (tx, rx) = std::sync::mpsc::channel();
    let mut decoder = GifDecoder::with_listener(move |event| {
        let _ = tx.send(*event);
    });
    decoder.decode_bytes(&data);
    drop(decoder);
    let events: Vec<ParseEvent> = rx.iter().collect();
    assert_eq!(
        events,
        [
            ParseEvent::FrameReady { index: 0, first: true },
            ParseEvent::FrameReady { index: 1, first: false },
            ParseEvent::Finished { frames: 2 },
        ]
    );
}
