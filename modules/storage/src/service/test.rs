use crate::service::{StorageBackend, StorageKey};
use bytes::BytesMut;
use futures::TryStreamExt;

const DIGEST: &str = "a591a6d40bf420404a011733cfb7b190d62c65bf0bcda32b57b277d9ad9f146e";

pub async fn test_store_read_and_delete<B: StorageBackend>(backend: B) {
    let result = backend
        .store_reader(&b"Hello World"[..])
        .await
        .expect("store must succeed");

    assert_eq!(result.key().to_string(), DIGEST);

    let stream = backend
        .retrieve(result.key())
        .await
        .expect("retrieve must succeed")
        .expect("must be found");

    let content = stream.try_collect::<BytesMut>().await.unwrap();

    assert_eq!(content.as_ref(), b"Hello World");

    backend
        .delete(result.key())
        .await
        .expect("delete must succeed");
    assert!(backend.retrieve_buf(result.key()).await.unwrap().is_none());
    backend
        .delete(result.key())
        .await
        .expect("delete should be idempotent");
}

pub async fn test_read_not_found<B: StorageBackend>(backend: B) {
    let key = StorageKey::try_from(DIGEST).expect("must be a valid key");

    let result = backend.retrieve_buf(key).await.expect("retrieve must succeed");

    assert!(result.is_none());
}
