#[cfg(test)]
mod tests {
    use std::fs::OpenOptions;
    use std::io::{Seek, SeekFrom, Write as IoWrite};

    use crate::value::Value;
    use crate::wal::{Wal, WalError, WalHeader};
    use crate::write::Write as EngineWrite;
    use tempfile::TempDir;

    #[test]
    fn corrupted_header_is_rejected_on_open() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("wal-000000.log");
        let _wal: Wal<EngineWrite> = Wal::open(&path, None).unwrap();

        let mut f = OpenOptions::new().write(true).open(&path).unwrap();
        f.seek(SeekFrom::Start(4)).unwrap();
        f.write_all(&[0xFF]).unwrap();
        f.sync_all().unwrap();

        let err = Wal::<EngineWrite>::open(&path, None).unwrap_err();
        assert!(matches!(err, WalError::InvalidHeader(_)));
    }

    #[test]
    fn corrupted_record_checksum_is_detected_during_replay() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("wal-000000.log");
        let wal = Wal::open(&path, None).unwrap();

        wal.append(&EngineWrite::add("k", Value::Integer(1), 1, 1))
            .unwrap();

        let mut f = OpenOptions::new().write(true).open(&path).unwrap();
        f.seek(SeekFrom::End(-1)).unwrap();
        f.write_all(&[0x00]).unwrap();
        f.sync_all().unwrap();

        let err = wal.replay_iter().unwrap().collect::<Result<Vec<_>, _>>();
        assert!(matches!(err, Err(WalError::ChecksumMismatch)));
    }

    #[test]
    fn oversized_record_length_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("wal-000000.log");
        let wal = Wal::open(&path, None).unwrap();

        wal.append(&EngineWrite::add("k", Value::Integer(1), 1, 1))
            .unwrap();

        let mut f = OpenOptions::new().write(true).open(&path).unwrap();
        f.seek(SeekFrom::Start(WalHeader::HEADER_DISK_SIZE as u64))
            .unwrap();
        f.write_all(&[0xFF, 0xFF, 0xFF, 0xFF]).unwrap();
        f.sync_all().unwrap();

        let err = wal.replay_iter().unwrap().collect::<Result<Vec<_>, _>>();
        assert!(matches!(err, Err(WalError::RecordTooLarge(_))));
    }
}
