use itertools::Itertools;
use sea_orm::{ActiveModelTrait, EntityTrait, Iterable};

/// The number of bind parameters a single statement may carry.
///
/// PostgreSQL allows `u16::MAX`, SQLite (since 3.32) allows `i16::MAX`. We stay below the smaller
/// one so that the same code works on both backends.
const MAX_PARAMETERS: usize = i16::MAX as usize;

/// Batches of items, owned so that they can be held across an `.await`.
pub type Chunks<T> = std::vec::IntoIter<Vec<T>>;

pub trait EntityChunkedIter: Sized {
    type Item: ActiveModelTrait;

    fn chunked(self) -> Chunks<Self::Item>;
}

impl<T> EntityChunkedIter for T
where
    T: IntoIterator,
    <T as IntoIterator>::Item: ActiveModelTrait,
{
    type Item = T::Item;

    fn chunked(self) -> Chunks<Self::Item> {
        chunked(self)
    }
}

/// Chunk active models so that a bulk insert of one chunk stays within the parameter limit.
pub fn chunked<M, I>(i: I) -> Chunks<I::Item>
where
    M: ActiveModelTrait,
    I: IntoIterator<Item = M>,
{
    chunked_with(<M::Entity as EntityTrait>::Column::iter().count(), i)
}

/// Chunk items, each of which will consume `values` parameters.
pub fn chunked_with<I>(values: usize, i: I) -> Chunks<I::Item>
where
    I: IntoIterator,
{
    i.into_iter()
        .chunks(MAX_PARAMETERS / values.max(1) - 8)
        .into_iter()
        .map(|chunk| chunk.collect())
        .collect::<Vec<_>>()
        .into_iter()
}
