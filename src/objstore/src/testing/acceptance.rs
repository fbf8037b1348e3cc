//! Behaviour every [`Bucket`] backend must show.
//!
//! The cases use disjoint key prefixes and run concurrently.

use std::sync::Arc;

use anyhow::{Context, ensure};
use bytes::Bytes;

use crate::Bucket;

/// Run the whole suite against an empty bucket.
pub async fn run(bucket: Arc<dyn Bucket>) -> anyhow::Result<()> {
    ensure!(
        bucket.list("").await?.is_empty(),
        "bucket {} is expected to start empty",
        bucket.name()
    );

    futures::try_join!(
        put_get_exists(bucket.as_ref()),
        overwrite(bucket.as_ref()),
        list(bucket.as_ref()),
        delete(bucket.as_ref()),
        not_found(bucket.as_ref()),
    )?;

    let root = bucket.list("").await?;
    ensure!(
        root == ["list/", "overwrite/", "put_get/"],
        "unexpected bucket root after suite: {root:?}"
    );
    Ok(())
}

async fn put_get_exists(bucket: &dyn Bucket) -> anyhow::Result<()> {
    ensure!(
        !bucket.exists("put_get/obj").await?,
        "object exists before upload"
    );

    bucket
        .put("put_get/obj", Bytes::from_static(b"@test-data@"))
        .await
        .context("put")?;

    ensure!(
        bucket.exists("put_get/obj").await?,
        "object missing after upload"
    );
    let data = bucket.get("put_get/obj").await.context("get")?;
    ensure!(
        data == Bytes::from_static(b"@test-data@"),
        "unexpected content {data:?}"
    );

    bucket.put("put_get/empty", Bytes::new()).await?;
    ensure!(
        bucket.get("put_get/empty").await?.is_empty(),
        "empty object has content"
    );
    Ok(())
}

async fn overwrite(bucket: &dyn Bucket) -> anyhow::Result<()> {
    bucket
        .put("overwrite/obj", Bytes::from_static(b"first"))
        .await?;
    bucket
        .put("overwrite/obj", Bytes::from_static(b"second"))
        .await?;

    let data = bucket.get("overwrite/obj").await?;
    ensure!(
        data == Bytes::from_static(b"second"),
        "overwrite lost: {data:?}"
    );
    Ok(())
}

async fn list(bucket: &dyn Bucket) -> anyhow::Result<()> {
    for key in [
        "list/id1/obj_1.some",
        "list/id1/obj_2.some",
        "list/id1/obj_3.some",
        "list/id2/obj_4.some",
        "list/obj_5.some",
    ] {
        bucket.put(key, Bytes::from_static(b"@test-data@")).await?;
    }

    let top = bucket.list("list/").await?;
    ensure!(
        top == ["list/id1/", "list/id2/", "list/obj_5.some"],
        "unexpected listing of list/: {top:?}"
    );

    let id1 = bucket.list("list/id1/").await?;
    let expected = [
        "list/id1/obj_1.some",
        "list/id1/obj_2.some",
        "list/id1/obj_3.some",
    ];
    ensure!(id1 == expected, "unexpected listing of list/id1/: {id1:?}");

    // A prefix without the trailing delimiter lists the same directory.
    let id2 = bucket.list("list/id2").await?;
    ensure!(
        id2 == ["list/id2/obj_4.some"],
        "unexpected listing of list/id2: {id2:?}"
    );

    let missing = bucket.list("list/id3/").await?;
    ensure!(
        missing.is_empty(),
        "unexpected listing of list/id3/: {missing:?}"
    );
    Ok(())
}

async fn delete(bucket: &dyn Bucket) -> anyhow::Result<()> {
    bucket.put("delete/a", Bytes::from_static(b"a")).await?;
    bucket.put("delete/b", Bytes::from_static(b"b")).await?;

    bucket.delete("delete/a").await.context("delete")?;
    ensure!(
        !bucket.exists("delete/a").await?,
        "object exists after delete"
    );
    ensure!(
        bucket.exists("delete/b").await?,
        "sibling removed by delete"
    );

    let err = bucket
        .delete("delete/a")
        .await
        .err()
        .context("deleting a removed object succeeded")?;
    ensure!(err.is_not_found(), "unexpected error deleting twice: {err}");

    bucket.delete("delete/b").await?;
    let left = bucket.list("delete/").await?;
    ensure!(left.is_empty(), "objects left after delete: {left:?}");
    Ok(())
}

async fn not_found(bucket: &dyn Bucket) -> anyhow::Result<()> {
    let err = bucket
        .get("missing/obj")
        .await
        .err()
        .context("reading a missing object succeeded")?;
    ensure!(
        err.is_not_found(),
        "unexpected error for missing object: {err}"
    );
    ensure!(
        !bucket.exists("missing/obj").await?,
        "missing object exists"
    );
    Ok(())
}
