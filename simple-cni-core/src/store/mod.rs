use std::{
    collections::BTreeMap,
    fs,
    io,
    net::Ipv4Addr,
    path::{Path, PathBuf},
};

use log::{debug, info};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use self::lock::{FileLock, FileLockGuard};
use crate::durable::write_atomically;

pub mod lock;

pub const DEFAULT_DATA_DIR: &str = "/var/lib/cni";

const LOCK_FILENAME: &str = "lock";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Address store I/O failed! Reason: {}", .0)]
    Io(io::Error),
    #[error("Address store {0:?} is corrupted! Reason: {1}")]
    Corrupt(PathBuf, serde_json::Error),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerNetInfo {
    pub id: String,
    #[serde(rename = "if")]
    pub if_name: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AddressDocument {
    #[serde(default)]
    ips: BTreeMap<Ipv4Addr, ContainerNetInfo>,
    #[serde(
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    last: Option<Ipv4Addr>,
}

/// Allocation records of a single network, kept in
/// `<data dir>/<network>/<network>.json` next to the `lock` file.
///
/// Nothing is read until [`AddressStore::lock`] is called: the document only
/// lives inside the returned [`LockedStore`].
#[derive(Debug)]
pub struct AddressStore {
    lock: FileLock,
    data_file: PathBuf,
}

impl AddressStore {
    pub fn open(data_dir: &Path, network: &str) -> Result<Self, StoreError> {
        let data_dir = match data_dir.as_os_str().is_empty() {
            true => Path::new(DEFAULT_DATA_DIR),
            false => data_dir,
        };
        let dir = data_dir.join(network);

        fs::create_dir_all(&dir).map_err(StoreError::Io)?;

        let lock = FileLock::open(&dir.join(LOCK_FILENAME)).map_err(StoreError::Io)?;
        let data_file = dir.join(format!("{network}.json"));

        Ok(Self { lock, data_file })
    }

    /// Acquires the inter-process lock and loads a fresh copy of the document.
    ///
    /// The lock is released when the returned store is dropped.
    pub fn lock(&self) -> Result<LockedStore<'_>, StoreError> {
        debug!("Waiting for {:?} lock...", self.data_file);

        let guard = self.lock.lock().map_err(StoreError::Io)?;
        let mut locked = LockedStore {
            _guard: guard,
            data_file: &self.data_file,
            document: AddressDocument::default(),
        };

        locked.load()?;

        Ok(locked)
    }
}

pub struct LockedStore<'a> {
    _guard: FileLockGuard<'a>,
    data_file: &'a Path,
    document: AddressDocument,
}

impl<'a> LockedStore<'a> {
    pub fn load(&mut self) -> Result<(), StoreError> {
        match fs::read(self.data_file) {
            Ok(raw) => {
                self.document = serde_json::from_slice(&raw)
                    .map_err(|err| StoreError::Corrupt(self.data_file.to_owned(), err))?;
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                info!("Initializing address store at {:?}...", self.data_file);

                self.document = AddressDocument::default();
                self.persist()?;
            }
            Err(err) => return Err(StoreError::Io(err)),
        }

        Ok(())
    }

    pub fn lookup_by_container(&self, id: &str) -> Option<Ipv4Addr> {
        self.document
            .ips
            .iter()
            .find(|(_, info)| info.id == id)
            .map(|(ip, _)| *ip)
    }

    pub fn contains(&self, address: &Ipv4Addr) -> bool {
        self.document.ips.contains_key(address)
    }

    pub fn last(&self) -> Option<Ipv4Addr> {
        self.document.last
    }

    pub fn len(&self) -> usize {
        self.document.ips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.document.ips.is_empty()
    }

    pub fn add(&mut self, address: Ipv4Addr, id: &str, if_name: &str) -> Result<(), StoreError> {
        self.document.ips.insert(
            address,
            ContainerNetInfo {
                id: id.to_owned(),
                if_name: if_name.to_owned(),
            },
        );
        self.document.last = Some(address);

        self.persist()
    }

    /// Returns the released address, if the container had one.
    pub fn remove(&mut self, id: &str) -> Result<Option<Ipv4Addr>, StoreError> {
        let released = self.lookup_by_container(id);

        if released.is_none() {
            return Ok(None);
        }

        self.document.ips.retain(|_, info| info.id != id);
        self.persist()?;

        Ok(released)
    }

    pub fn persist(&self) -> Result<(), StoreError> {
        let raw = serde_json::to_vec(&self.document)
            .map_err(|err| StoreError::Io(io::Error::new(io::ErrorKind::InvalidData, err)))?;

        write_atomically(self.data_file, &raw).map_err(StoreError::Io)
    }
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<Ipv4Addr>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;

    match value.as_deref() {
        None | Some("") => Ok(None),
        Some(address) => address
            .parse()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}
