use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::{CloudError, CloudResult};
use crate::schema::{PointTable, Schema};
use crate::tree::TreeAddress;

/// Bytes preceding each tube in the serialized base: depth, code and row
/// count, little-endian.
const TUBE_HEADER_SIZE: usize = 4 + 8 + 4;

/// The in-memory base region: one tube of points per occupied node.
///
/// On storage the base is a sequence of tubes in address order, each a
/// header followed by its rows.
#[derive(Clone, Debug)]
pub struct BaseData {
    schema: Arc<Schema>,
    tubes: HashMap<TreeAddress, PointTable>,
}

impl BaseData {
    pub fn new(schema: Arc<Schema>) -> BaseData {
        BaseData {
            schema,
            tubes: HashMap::new(),
        }
    }

    /// Appends one row to the tube at `address`.
    pub fn push(&mut self, address: TreeAddress, row: &[u8]) -> CloudResult<()> {
        match self.tubes.get_mut(&address) {
            Some(tube) => tube.push(row),
            None => {
                let mut tube = PointTable::new(self.schema.clone())?;
                tube.push(row)?;
                self.tubes.insert(address, tube);
                Ok(())
            }
        }
    }

    /// Replaces the tube at `address`. The tube must share this base's schema.
    pub fn insert(&mut self, address: TreeAddress, tube: PointTable) -> CloudResult<()> {
        if tube.schema().as_ref() != self.schema.as_ref() {
            return Err(CloudError::InvalidSchema(format!(
                "tube at {} does not match the base schema",
                address
            )));
        }
        self.tubes.insert(address, tube);
        Ok(())
    }

    /// Points stored at `address`, if any.
    pub fn tube(&self, address: &TreeAddress) -> Option<&PointTable> {
        self.tubes.get(address)
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn num_tubes(&self) -> usize {
        self.tubes.len()
    }

    pub fn num_points(&self) -> usize {
        self.tubes.values().map(PointTable::len).sum()
    }

    /// Occupied addresses with their point counts.
    pub fn counts(&self) -> impl Iterator<Item = (TreeAddress, usize)> + '_ {
        self.tubes.iter().map(|(address, tube)| (*address, tube.len()))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut addresses: Vec<&TreeAddress> = self.tubes.keys().collect();
        addresses.sort();

        let mut bytes = Vec::with_capacity(
            self.num_points() * self.schema.point_size() + addresses.len() * TUBE_HEADER_SIZE,
        );
        for address in addresses {
            let tube = &self.tubes[address];
            bytes.extend_from_slice(&address.depth.to_le_bytes());
            bytes.extend_from_slice(&address.code.to_le_bytes());
            bytes.extend_from_slice(&(tube.len() as u32).to_le_bytes());
            bytes.extend_from_slice(tube.data());
        }
        bytes
    }

    /// Decodes tubes written by [`BaseData::to_bytes`].
    pub fn from_bytes(schema: Arc<Schema>, bytes: &[u8]) -> CloudResult<BaseData> {
        let mut base = BaseData::new(schema.clone());
        let size = schema.point_size();
        let mut rest = bytes;

        while !rest.is_empty() {
            if rest.len() < TUBE_HEADER_SIZE {
                return Err(CloudError::Encoding(format!(
                    "truncated base tube header of {} bytes",
                    rest.len()
                )));
            }
            let (header, body) = rest.split_at(TUBE_HEADER_SIZE);
            let depth = u32::from_le_bytes(take(&header[..4]));
            let code = u64::from_le_bytes(take(&header[4..12]));
            let count = u32::from_le_bytes(take(&header[12..])) as usize;

            let len = count * size;
            if body.len() < len {
                return Err(CloudError::Encoding(format!(
                    "base tube {}-{} needs {} bytes, {} remain",
                    depth,
                    code,
                    len,
                    body.len()
                )));
            }
            let (rows, next) = body.split_at(len);
            let tube = PointTable::from_bytes(schema.clone(), rows.to_vec())?;
            base.tubes.insert(TreeAddress::new(depth, code), tube);
            rest = next;
        }
        Ok(base)
    }
}

fn take<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut buf = [0u8; N];
    buf.copy_from_slice(&bytes[..N]);
    buf
}
