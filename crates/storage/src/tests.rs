use super::*;
use crate::codec;
use common::Record;
use proptest::prelude::*;
use tempfile::tempdir;
use types::Value;

fn page_with(payload: &[u8]) -> Page {
    let mut pool = PagePool::new();
    let mut page = Page::new(PageId(1), pool.acquire());
    page.write_payload(payload).unwrap();
    page
}

#[test]
fn payload_round_trips_through_frame() {
    let page = page_with(b"hello records");
    assert_eq!(page.payload().unwrap(), b"hello records");
    assert!(page.dirty);
}

#[test]
fn oversized_payload_is_rejected() {
    let mut pool = PagePool::new();
    let mut page = Page::new(PageId(1), pool.acquire());
    let huge = vec![7u8; PAGE_CAPACITY + 1];
    assert!(page.write_payload(&huge).is_err());
}

#[test]
fn rewrite_clears_stale_tail() {
    let mut page = page_with(&[9u8; 100]);
    page.write_payload(&[1u8; 4]).unwrap();
    assert_eq!(page.payload().unwrap(), &[1u8; 4]);
    // Bytes past the new payload are zero again.
    assert!(page.data[8..].iter().all(|b| *b == 0));
}

#[test]
fn pool_reuses_buffers() {
    let mut pool = PagePool::new();
    let buf = pool.acquire();
    pool.release(buf);
    assert_eq!(pool.pooled(), 1);
    let reused = pool.acquire();
    assert_eq!(pool.pooled(), 0);
    assert!(reused.iter().all(|b| *b == 0));
}

#[test]
fn file_reads_unwritten_page_as_zeroes() {
    let dir = tempdir().unwrap();
    let mut file = TableFile::open(&dir.path().join("users.tbl")).unwrap();
    let mut buf = vec![0xffu8; PAGE_SIZE];
    let existed = file.read_page(PageId(5), &mut buf).unwrap();
    assert!(!existed);
    assert!(buf.iter().all(|b| *b == 0));
}

#[test]
fn file_round_trips_pages_at_fixed_offsets() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("users.tbl");
    let mut file = TableFile::open(&path).unwrap();

    let mut one = vec![0u8; PAGE_SIZE];
    one[0] = 11;
    let mut two = vec![0u8; PAGE_SIZE];
    two[0] = 22;
    file.write_page(PageId(1), &one).unwrap();
    file.write_page(PageId(2), &two).unwrap();

    let mut reopened = TableFile::open(&path).unwrap();
    assert_eq!(reopened.num_pages().unwrap(), 3);
    let mut buf = vec![0u8; PAGE_SIZE];
    reopened.read_page(PageId(2), &mut buf).unwrap();
    assert_eq!(buf[0], 22);
    reopened.read_page(PageId(1), &mut buf).unwrap();
    assert_eq!(buf[0], 11);
}

#[test]
fn metadata_page_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("users.tbl");
    let mut file = TableFile::open(&path).unwrap();
    assert_eq!(file.read_metadata().unwrap(), None);

    file.write_metadata(b"schema bytes").unwrap();
    let mut reopened = TableFile::open(&path).unwrap();
    assert_eq!(reopened.read_metadata().unwrap().unwrap(), b"schema bytes");
}

#[test]
fn record_group_codec_round_trips() {
    let records = vec![
        Record::new(vec![
            Value::Id("u1".into()),
            Value::Text("Alice".into()),
            Value::Int(30),
            Value::Float(1.5),
            Value::Bool(true),
            Value::DateTime(1_700_000_000_000),
            Value::List(vec![Value::Id("p1".into()), Value::Id("p2".into())]),
            Value::Null,
        ]),
        Record::new(vec![Value::Id("u2".into()), Value::Null]),
    ];

    let bytes = codec::encode_records(&records).unwrap();
    let back = codec::decode_records(&bytes).unwrap();
    assert_eq!(records, back);
}

#[test]
fn empty_payload_decodes_to_no_records() {
    assert_eq!(codec::decode_records(&[]).unwrap(), Vec::<Record>::new());
}

proptest! {
    #[test]
    fn codec_round_trips_arbitrary_int_records(ids in proptest::collection::vec("[a-z0-9]{1,12}", 0..20), n in any::<i64>()) {
        let records: Vec<Record> = ids
            .iter()
            .map(|id| Record::new(vec![Value::Id(id.clone()), Value::Int(n)]))
            .collect();
        let bytes = codec::encode_records(&records).unwrap();
        prop_assert_eq!(codec::decode_records(&bytes).unwrap(), records);
    }
}
