//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `packs` - Credit pack records (key: pack_id)
//! - `positions` - Position index (key: encoded position, value: pack_id)
//!
//! Positions are encoded big-endian with the sign bit flipped, so the
//! byte order of the index matches the numeric order of positions and a
//! plain iterator yields packs in consumption order.

use crate::{
    error::{Error, Result},
    store::{PackStore, WriteSet},
    types::{CreditPack, Order, PackId},
    Config,
};
use parking_lot::Mutex;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, IteratorMode, Options, WriteBatch, DB,
};
use std::sync::Arc;
use uuid::Uuid;

/// Column family names
const CF_PACKS: &str = "packs";
const CF_POSITIONS: &str = "positions";

const SIGN_BIT: u64 = 1 << 63;

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,

    /// Serializes commits so staging sees the state it writes over
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").field("path", &self.db.path()).finish()
    }
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        // Small, update-heavy records
        db_opts.set_compaction_style(DBCompactionStyle::Level);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_PACKS, Self::cf_options_packs()),
            ColumnFamilyDescriptor::new(CF_POSITIONS, Self::cf_options_positions()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened RocksDB credit store");

        Ok(Self {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
        })
    }

    fn cf_options_packs() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        // Point lookups by pack id
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_options_positions() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    // Key helpers

    fn position_key(position: i64) -> [u8; 8] {
        ((position as u64) ^ SIGN_BIT).to_be_bytes()
    }

    fn decode_pack_id(bytes: &[u8]) -> Result<PackId> {
        Uuid::from_slice(bytes)
            .map_err(|e| Error::Storage(format!("Corrupt pack id in position index: {}", e)))
    }

    // Reads

    fn get_pack(&self, id: PackId) -> Result<Option<CreditPack>> {
        let cf = self.cf_handle(CF_PACKS)?;
        match self.db.get_cf(cf, id.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    fn position_owner(&self, position: i64) -> Result<Option<PackId>> {
        let cf = self.cf_handle(CF_POSITIONS)?;
        match self.db.get_cf(cf, Self::position_key(position))? {
            Some(value) => Ok(Some(Self::decode_pack_id(&value)?)),
            None => Ok(None),
        }
    }

    fn scan_positions(&self, mode: IteratorMode<'_>) -> Result<Vec<CreditPack>> {
        let cf = self.cf_handle(CF_POSITIONS)?;
        let mut packs = Vec::new();

        for item in self.db.iterator_cf(cf, mode) {
            let (_, value) = item?;
            let id = Self::decode_pack_id(&value)?;
            let pack = self.get_pack(id)?.ok_or_else(|| {
                Error::Storage(format!("Position index points at missing pack {}", id))
            })?;
            packs.push(pack);
        }

        Ok(packs)
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        tracing::info!(path = ?self.db.path(), "RocksDB credit store closed");
    }
}

impl PackStore for Storage {
    fn find_all_ordered(&self, order: Order) -> Result<Vec<CreditPack>> {
        match order {
            Order::Ascending => self.scan_positions(IteratorMode::Start),
            Order::Descending => self.scan_positions(IteratorMode::End),
        }
    }

    fn find_with_positive_balance(&self) -> Result<Vec<CreditPack>> {
        let mut packs = self.scan_positions(IteratorMode::Start)?;
        packs.retain(|pack| pack.credit > 0);
        Ok(packs)
    }

    fn find_by_id(&self, id: PackId) -> Result<Option<CreditPack>> {
        self.get_pack(id)
    }

    fn commit(&self, writes: WriteSet) -> Result<()> {
        if writes.is_empty() {
            return Ok(());
        }

        let _guard = self.write_lock.lock();

        let staged = writes.stage(|id| self.get_pack(id), |position| self.position_owner(position))?;

        let cf_packs = self.cf_handle(CF_PACKS)?;
        let cf_positions = self.cf_handle(CF_POSITIONS)?;
        let mut batch = WriteBatch::default();

        // Vacate old slots first; a later put may reuse one of them
        for write in &staged {
            if let Some(previous) = write.previous_position {
                if previous != write.pack.position {
                    batch.delete_cf(cf_positions, Self::position_key(previous));
                }
            }
        }

        for write in &staged {
            let value = bincode::serialize(&write.pack)?;
            batch.put_cf(cf_packs, write.pack.id.as_bytes(), &value);
            batch.put_cf(
                cf_positions,
                Self::position_key(write.pack.position),
                write.pack.id.as_bytes(),
            );
        }

        // Atomic commit
        self.db.write(batch)?;

        tracing::debug!(
            ops = writes.len(),
            packs = staged.len(),
            "RocksDB commit applied"
        );

        Ok(())
    }

    fn count(&self) -> Result<u64> {
        let cf = self.cf_handle(CF_PACKS)?;
        let mut count = 0u64;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }
}
