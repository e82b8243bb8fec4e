//! Lazy entity sequences returned by repository queries.

use std::marker::PhantomData;

use fleetkeeper_model::{DatabaseEntity, Row};

use crate::error::PersistenceResult;

/// Finite, non-restartable sequence of entities.
///
/// Rows are fetched up front; each row is unmarshalled only when the iterator
/// reaches it, so one malformed row fails its own item and nothing else.
#[derive(Debug)]
pub struct EntityIter<E> {
    rows: std::vec::IntoIter<Row>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: DatabaseEntity> EntityIter<E> {
    pub(crate) fn new(rows: Vec<Row>) -> Self {
        Self {
            rows: rows.into_iter(),
            _entity: PhantomData,
        }
    }

    /// Number of entities not yet yielded.
    pub fn remaining(&self) -> usize {
        self.rows.len()
    }
}

impl<E: DatabaseEntity> Iterator for EntityIter<E> {
    type Item = PersistenceResult<E>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rows
            .next()
            .map(|row| E::unmarshal(&row).map_err(Into::into))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rows.size_hint()
    }
}

impl<E: DatabaseEntity> ExactSizeIterator for EntityIter<E> {}
