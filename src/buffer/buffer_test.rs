use super::*;

#[test]
fn test_push_pop_single_chunk() {
    let rb = RingBuffer::new(64);
    let mut out = vec![0u8; 16];

    assert!(rb.push(b"hello"));
    assert_eq!(rb.len(), 5);

    let n = rb.pop(&mut out);
    assert_eq!(n, 5);
    assert_eq!(&out[..n], b"hello");
    assert!(rb.is_empty());
}

#[test]
fn test_pop_preserves_chunk_boundaries() {
    let rb = RingBuffer::new(64);
    let mut out = vec![0u8; 16];

    assert!(rb.push(b"abc"));
    assert!(rb.push(b"defg"));

    let n = rb.pop(&mut out);
    assert_eq!(&out[..n], b"abc");
    let n = rb.pop(&mut out);
    assert_eq!(&out[..n], b"defg");
    assert_eq!(rb.pop(&mut out), 0);
}

#[test]
fn test_pop_empty_returns_zero() {
    let rb = RingBuffer::new(16);
    let mut out = vec![0u8; 16];
    assert_eq!(rb.pop(&mut out), 0);
}

#[test]
fn test_overflow_push_rejected_whole() {
    // 16 bytes of capacity: a 10-byte chunk occupies 12, the second cannot fit.
    let rb = RingBuffer::new(16);

    assert!(rb.push(&[0xaa; 10]));
    assert!(!rb.push(&[0xbb; 10]));

    // the rejected chunk must leave no partial bytes behind
    let mut out = vec![0u8; 32];
    let n = rb.pop(&mut out);
    assert_eq!(n, 10);
    assert!(out[..n].iter().all(|&b| b == 0xaa));
    assert!(rb.is_empty());
}

#[test]
fn test_oversized_chunk_rejected() {
    let rb = RingBuffer::new(16);
    assert!(!rb.push(&[0u8; 20]));
    assert!(rb.is_empty());
}

#[test]
fn test_wrap_around() {
    let rb = RingBuffer::new(16);
    let mut out = vec![0u8; 16];

    // keep the buffer non-empty while the write position crosses the
    // capacity boundary
    assert!(rb.push(&[0xa; 4]));
    assert!(rb.push(&[0xb; 4]));
    assert_eq!(rb.pop(&mut out), 4);
    assert!(rb.push(&[0xc; 4]));

    let n = rb.pop(&mut out);
    assert_eq!(n, 4);
    assert!(out[..n].iter().all(|&b| b == 0xb));
    let n = rb.pop(&mut out);
    assert_eq!(n, 4);
    assert!(out[..n].iter().all(|&b| b == 0xc));
    assert!(rb.is_empty());
}

#[test]
fn test_interleaved_wrap_ordering() {
    let rb = RingBuffer::new(32);
    let mut out = vec![0u8; 32];
    let mut expect = 0u8;

    for round in 0u8..20 {
        assert!(rb.push(&[round.wrapping_mul(3), round.wrapping_mul(3) + 1]));
        if round % 2 == 1 {
            while !rb.is_empty() {
                let n = rb.pop(&mut out);
                assert_eq!(n, 2);
                assert_eq!(out[0], expect);
                assert_eq!(out[1], expect + 1);
                expect = expect.wrapping_add(3);
            }
        }
    }
}

#[test]
fn test_shutdown_stops_push_and_pop() {
    let rb = RingBuffer::new(64);
    let mut out = vec![0u8; 16];

    assert!(rb.push(b"data"));
    rb.shutdown();

    assert!(rb.is_shutdown());
    assert!(!rb.push(b"more"));
    assert_eq!(rb.pop(&mut out), 0);
}

#[test]
fn test_short_output_truncates_and_discards() {
    let rb = RingBuffer::new(64);
    let mut out = vec![0u8; 4];

    assert!(rb.push(b"longchunk"));
    let n = rb.pop(&mut out);
    assert_eq!(n, 4);
    assert_eq!(&out[..n], b"long");
    // the truncated remainder is gone, not re-queued
    assert!(rb.is_empty());
}

#[test]
fn test_empty_push_is_noop() {
    let rb = RingBuffer::new(16);
    assert!(rb.push(&[]));
    assert!(rb.is_empty());
}
