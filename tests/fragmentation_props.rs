use bytes::Bytes;
use proptest::prelude::*;

use rsocket_wire::fragment::{
    fragment_with_request_n, Reassembler, METADATA_LENGTH_OVERHEAD, REQUEST_N_FRAGMENT_OVERHEAD,
};
use rsocket_wire::metadata::{
    decode_composite_metadata, encode_composite_metadata, MimeKey, WellKnownMimeType,
};
use rsocket_wire::protocol::{Frame, FrameType, Payload};

fn fragmentable_type() -> impl Strategy<Value = FrameType> {
    prop_oneof![
        Just(FrameType::RequestResponse),
        Just(FrameType::RequestFnf),
        Just(FrameType::RequestStream),
        Just(FrameType::RequestChannel),
        Just(FrameType::Payload),
    ]
}

fn registered_mime_types() -> Vec<WellKnownMimeType> {
    (0u8..=0x7F)
        .filter_map(WellKnownMimeType::from_identifier)
        .collect()
}

fn mime_key() -> impl Strategy<Value = MimeKey> {
    prop_oneof![
        prop::sample::select(registered_mime_types()).prop_map(MimeKey::from),
        "[a-z]{1,12}/x-[a-z0-9.]{1,40}".prop_map(MimeKey::Explicit),
    ]
}

fn frame_body_len(frame: &Frame) -> usize {
    frame.data().map_or(0, Bytes::len)
        + frame
            .metadata()
            .map_or(0, |m| m.len() + METADATA_LENGTH_OVERHEAD)
}

proptest! {
    #[test]
    fn prop_fragments_reassemble_to_original(
        data in prop::collection::vec(any::<u8>(), 0..2000),
        metadata in prop::option::of(prop::collection::vec(any::<u8>(), 1..500)),
        max in 4usize..300,
        frame_type in fragmentable_type(),
        request_n in 1u32..1000,
    ) {
        let payload = Payload::new(data, metadata.map(Bytes::from));
        let frames: Vec<Frame> =
            fragment_with_request_n(3, payload.clone(), max, frame_type, request_n, true)
                .unwrap()
                .collect();

        prop_assert!(!frames.is_empty());
        prop_assert_eq!(frames[0].frame_type(), frame_type);
        for frame in &frames[1..] {
            prop_assert_eq!(frame.frame_type(), FrameType::Payload);
        }
        let last = frames.len() - 1;
        for (i, frame) in frames.iter().enumerate() {
            prop_assert_eq!(frame.stream_id(), 3);
            prop_assert_eq!(frame.follows(), i != last);
        }

        let mut reassembler = Reassembler::new();
        let mut whole = None;
        for (i, frame) in frames.into_iter().enumerate() {
            let out = reassembler.push(frame).unwrap();
            if i == last {
                whole = out;
            } else {
                prop_assert!(out.is_none());
            }
        }

        let whole = whole.unwrap();
        prop_assert_eq!(whole.frame_type(), frame_type);
        prop_assert!(!whole.follows());
        if matches!(frame_type, FrameType::RequestStream | FrameType::RequestChannel) {
            prop_assert_eq!(whole.request_n_value(), Some(request_n));
        }
        prop_assert_eq!(whole.into_payload(), Some(payload));
    }

    #[test]
    fn prop_fragments_respect_size_budget(
        data in prop::collection::vec(any::<u8>(), 0..2000),
        metadata in prop::option::of(prop::collection::vec(any::<u8>(), 1..500)),
        max in 7usize..300,
        frame_type in fragmentable_type(),
    ) {
        let payload = Payload::new(data, metadata.map(Bytes::from));
        let frames = fragment_with_request_n(1, payload, max, frame_type, 1, false).unwrap();

        for (i, frame) in frames.enumerate() {
            let mut used = frame_body_len(&frame);
            if i == 0 && matches!(frame_type, FrameType::RequestStream | FrameType::RequestChannel) {
                used += REQUEST_N_FRAGMENT_OVERHEAD;
            }
            prop_assert!(used <= max, "frame {} uses {} of {}", i, used, max);
        }
    }

    #[test]
    fn prop_composite_metadata_round_trip(
        entries in prop::collection::vec(
            (mime_key(), prop::collection::vec(any::<u8>(), 0..300)),
            0..8,
        ),
    ) {
        let encoded = encode_composite_metadata(
            entries.iter().map(|(key, content)| (key.clone(), content.as_slice())),
        )
        .unwrap();

        let decoded: Vec<(MimeKey, Bytes)> = decode_composite_metadata(encoded)
            .map(|entry| entry.map(|e| (e.key(), e.content().clone())))
            .collect::<Result<_, _>>()
            .unwrap();

        prop_assert_eq!(decoded.len(), entries.len());
        for ((key, content), (got_key, got_content)) in entries.iter().zip(decoded.iter()) {
            prop_assert_eq!(key, got_key);
            prop_assert_eq!(content.as_slice(), got_content.as_ref());
        }
    }
}
