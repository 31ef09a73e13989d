#![allow(missing_docs)]

use chunkstore::chunk_grid::{ArraySubset, SharedArray};
use chunkstore::context::{CachePool, Context, ContextResourceSpec, MemoryKeyValueStore};
use chunkstore::driver::{ReadWriteMode, ResizeOptions};
use chunkstore::spec::{open, OpenMode, Spec, SpecOptions};
use chunkstore::storage::{AsyncReadableWritableStorageTraits, StoreKey, StorePrefix};
use chunkstore::ErrorKind;
use serde_json::{json, Value};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn options(open_mode: OpenMode) -> SpecOptions {
    SpecOptions {
        open_mode: Some(open_mode),
        ..Default::default()
    }
}

async fn stored_keys(context: &Context) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let store = context.get::<MemoryKeyValueStore>(&ContextResourceSpec::Default)?;
    Ok(store
        .store()
        .list_prefix(&StorePrefix::root())
        .await?
        .iter()
        .map(|key| key.as_str().to_string())
        .collect())
}

async fn stored_json(context: &Context, key: &str) -> Result<Value, Box<dyn std::error::Error>> {
    let store = context.get::<MemoryKeyValueStore>(&ContextResourceSpec::Default)?;
    let bytes = store
        .store()
        .get(&StoreKey::new(key)?)
        .await?
        .ok_or("missing key")?;
    Ok(serde_json::from_slice(&bytes)?)
}

async fn store_json(context: &Context, key: &str, json: &Value) -> TestResult {
    let store = context.get::<MemoryKeyValueStore>(&ContextResourceSpec::Default)?;
    store
        .store()
        .set(&StoreKey::new(key)?, serde_json::to_vec(json)?.into())
        .await?;
    Ok(())
}

#[tokio::test]
async fn zarr_create_write_read() -> TestResult {
    let context = Context::default();
    let json = json!({
        "driver": "zarr",
        "path": "a/",
        "metadata": {"shape": [4, 4], "chunks": [2, 2], "dtype": "<i4", "dimension_separator": "/"}
    });
    let driver = open(&json, &context, &options(OpenMode::CREATE)).await?;
    assert_eq!(stored_keys(&context).await?, vec!["a/.zarray"]);

    let metadata = stored_json(&context, "a/.zarray").await?;
    assert_eq!(metadata["zarr_format"], 2);
    assert_eq!(metadata["shape"], json!([4, 4]));
    assert_eq!(metadata["chunks"], json!([2, 2]));
    assert_eq!(metadata["dtype"], "<i4");
    assert_eq!(metadata["dimension_separator"], "/");
    assert_eq!(metadata["fill_value"], Value::Null);

    let region = ArraySubset::new_with_ranges(&[0..2, 0..2]);
    driver
        .write(&region, &SharedArray::from_elements(vec![2, 2], &[1i32, 2, 3, 4])?)
        .await?;
    assert_eq!(stored_keys(&context).await?, vec!["a/.zarray", "a/0/0"]);

    let all = driver.read(&ArraySubset::new_with_shape(vec![4, 4])).await?;
    #[rustfmt::skip]
    assert_eq!(
        all.to_elements::<i32>()?,
        vec![
            1, 2, 0, 0,
            3, 4, 0, 0,
            0, 0, 0, 0,
            0, 0, 0, 0,
        ]
    );

    let region = ArraySubset::new_with_ranges(&[1..3, 1..4]);
    driver
        .write(&region, &SharedArray::from_elements(vec![2, 3], &[5i32, 6, 7, 8, 9, 10])?)
        .await?;
    assert_eq!(
        stored_keys(&context).await?,
        vec!["a/.zarray", "a/0/0", "a/0/1", "a/1/0", "a/1/1"]
    );
    assert_eq!(
        driver.read(&region).await?.to_elements::<i32>()?,
        vec![5, 6, 7, 8, 9, 10]
    );
    assert_eq!(
        driver
            .read(&ArraySubset::new_with_ranges(&[0..1, 0..4]))
            .await?
            .to_elements::<i32>()?,
        vec![1, 2, 0, 0]
    );

    // Reopen from the stored data.
    let reopened = open(&json, &context, &SpecOptions::default()).await?;
    assert_eq!(
        reopened.read(&region).await?.to_elements::<i32>()?,
        vec![5, 6, 7, 8, 9, 10]
    );
    Ok(())
}

#[tokio::test]
async fn zarr_read_write_errors() -> TestResult {
    let context = Context::default();
    let json = json!({
        "driver": "zarr",
        "metadata": {"shape": [4, 4], "chunks": [2, 2], "dtype": "<i4"},
        "create": true
    });
    let driver = open(&json, &context, &SpecOptions::default()).await?;
    let array = SharedArray::from_elements(vec![2, 2], &[1i32, 2, 3, 4])?;

    let out_of_bounds = ArraySubset::new_with_ranges(&[3..5, 0..2]);
    assert_eq!(
        driver.read(&out_of_bounds).await.unwrap_err().kind(),
        ErrorKind::OutOfRange
    );
    assert_eq!(
        driver.write(&out_of_bounds, &array).await.unwrap_err().kind(),
        ErrorKind::OutOfRange
    );
    let overflowing = ArraySubset::new_with_start_shape(vec![u64::MAX, 0], vec![2, 2])?;
    assert_eq!(
        driver.read(&overflowing).await.unwrap_err().kind(),
        ErrorKind::OutOfRange
    );
    assert_eq!(
        driver.write(&overflowing, &array).await.unwrap_err().kind(),
        ErrorKind::OutOfRange
    );
    let wrong_rank = ArraySubset::new_with_ranges(&[0..2]);
    assert_eq!(
        driver.read(&wrong_rank).await.unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );
    let region = ArraySubset::new_with_ranges(&[0..2, 0..2]);
    let wrong_dtype = SharedArray::from_elements(vec![2, 2], &[1u8, 2, 3, 4])?;
    assert_eq!(
        driver.write(&region, &wrong_dtype).await.unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );

    let read_only = open(
        &json!({"driver": "zarr"}),
        &context,
        &SpecOptions {
            read_write_mode: Some(ReadWriteMode::READ),
            ..Default::default()
        },
    )
    .await?;
    assert_eq!(read_only.read_write_mode(), ReadWriteMode::READ);
    assert_eq!(
        read_only.write(&region, &array).await.unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );
    assert_eq!(
        read_only
            .resize(&[None, None], &[Some(2), None], ResizeOptions::default())
            .await
            .unwrap_err()
            .kind(),
        ErrorKind::InvalidArgument
    );

    let write_only = open(
        &json!({"driver": "zarr"}),
        &context,
        &SpecOptions {
            read_write_mode: Some(ReadWriteMode::WRITE),
            ..Default::default()
        },
    )
    .await?;
    write_only.write(&region, &array).await?;
    assert_eq!(
        write_only.read(&region).await.unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );
    assert_eq!(read_only.read(&region).await?, array);
    Ok(())
}

#[tokio::test]
async fn zarr_open_modes() -> TestResult {
    let context = Context::default();
    let json = json!({
        "driver": "zarr",
        "path": "m",
        "metadata": {"shape": [4], "chunks": [2], "dtype": "<u2"}
    });

    let err = open(&json, &context, &SpecOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    open(&json, &context, &options(OpenMode::CREATE)).await?;
    assert_eq!(stored_keys(&context).await?, vec!["m/.zarray"]);

    let err = open(&json, &context, &options(OpenMode::CREATE))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);

    open(&json, &context, &options(OpenMode::OPEN_OR_CREATE)).await?;
    open(&json, &context, &SpecOptions::default()).await?;

    // Constraints that do not match the stored metadata.
    let mismatch = json!({"driver": "zarr", "path": "m", "metadata": {"chunks": [4]}});
    let err = open(&mismatch, &context, &SpecOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
    let mismatch = json!({"driver": "zarr", "path": "m", "dtype": "int32"});
    let err = open(&mismatch, &context, &SpecOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let invalid = json!({"driver": "zarr", "open": false, "create": false, "delete_existing": true});
    assert_eq!(
        Spec::from_json(&invalid).unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );
    Ok(())
}

#[tokio::test]
async fn zarr_delete_existing() -> TestResult {
    let context = Context::default();
    let json = json!({
        "driver": "zarr",
        "path": "d/",
        "metadata": {"shape": [4], "chunks": [2], "dtype": "<i4"}
    });
    let driver = open(&json, &context, &options(OpenMode::CREATE)).await?;
    driver
        .write(
            &ArraySubset::new_with_shape(vec![4]),
            &SharedArray::from_elements(vec![4], &[1i32, 2, 3, 4])?,
        )
        .await?;
    assert_eq!(
        stored_keys(&context).await?,
        vec!["d/.zarray", "d/0", "d/1"]
    );

    let replaced = json!({
        "driver": "zarr",
        "path": "d/",
        "metadata": {"shape": [4], "chunks": [4], "dtype": "<i4", "fill_value": 9}
    });
    let driver = open(&replaced, &context, &options(OpenMode::DELETE_EXISTING)).await?;
    assert_eq!(stored_keys(&context).await?, vec!["d/.zarray"]);
    assert_eq!(
        driver
            .read(&ArraySubset::new_with_shape(vec![4]))
            .await?
            .to_elements::<i32>()?,
        vec![9; 4]
    );
    Ok(())
}

#[tokio::test]
async fn zarr_shared_caches() -> TestResult {
    let context = Context::default();
    let json = json!({
        "driver": "zarr",
        "path": "s/",
        "metadata": {"shape": [8, 8], "chunks": [4, 4], "dtype": "<f8"},
        "open": true,
        "create": true
    });
    let (a, b) = futures::join!(
        open(&json, &context, &SpecOptions::default()),
        open(&json, &context, &SpecOptions::default())
    );
    let (a, b) = (a?, b?);
    assert_eq!(a.spec()?.cache_key()?, b.spec()?.cache_key()?);

    let cache_pool = context.get::<CachePool>(&ContextResourceSpec::Default)?;
    assert_eq!(cache_pool.num_caches(), 2);
    open(&json, &context, &SpecOptions::default()).await?;
    assert_eq!(cache_pool.num_caches(), 2);

    let region = ArraySubset::new_with_ranges(&[3..5, 3..5]);
    a.write(
        &region,
        &SharedArray::from_elements(vec![2, 2], &[0.5f64, 1.5, 2.5, 3.5])?,
    )
    .await?;
    assert_eq!(
        b.read(&region).await?.to_elements::<f64>()?,
        vec![0.5, 1.5, 2.5, 3.5]
    );

    // A different array in the same store shares the metadata cache but not the data cache.
    let other = json!({
        "driver": "zarr",
        "path": "t/",
        "metadata": {"shape": [8, 8], "chunks": [4, 4], "dtype": "<f8"},
        "create": true
    });
    let c = open(&other, &context, &SpecOptions::default()).await?;
    assert_ne!(a.spec()?.cache_key()?, c.spec()?.cache_key()?);
    assert_eq!(cache_pool.num_caches(), 3);
    Ok(())
}

#[test]
fn zarr_spec_cache_key() -> TestResult {
    let context = Context::default();
    let cache_key = |json: Value| -> Result<String, Box<dyn std::error::Error>> {
        Ok(Spec::from_json(&json)?.bind_context(&context)?.cache_key()?)
    };
    let base = cache_key(json!({
        "driver": "zarr",
        "path": "a",
        "metadata": {"chunks": [2, 2], "dtype": "<i4"}
    }))?;
    assert_eq!(
        base,
        cache_key(json!({
            "driver": "zarr",
            "kvstore": {"driver": "memory"},
            "path": "a/",
            "metadata": {"chunks": [2, 2], "dtype": "<i4", "shape": [10, 10], "fill_value": 1},
            "create": true,
            "recheck_cached_metadata": true,
            "schema": {"rank": 2}
        }))?
    );
    assert_ne!(
        base,
        cache_key(json!({
            "driver": "zarr",
            "path": "b",
            "metadata": {"chunks": [2, 2], "dtype": "<i4"}
        }))?
    );
    assert_ne!(
        base,
        cache_key(json!({
            "driver": "zarr",
            "path": "a",
            "metadata": {"chunks": [2, 2], "dtype": "<i4", "dimension_separator": "/"}
        }))?
    );

    let unbound = Spec::from_json(&json!({"driver": "zarr"}))?;
    assert!(unbound.cache_key().is_err());
    Ok(())
}

#[tokio::test]
async fn zarr_resize() -> TestResult {
    let context = Context::default();
    let json = json!({
        "driver": "zarr",
        "path": "r/",
        "metadata": {"shape": [4, 4], "chunks": [2, 2], "dtype": "<i4", "fill_value": 7},
        "create": true
    });
    let driver = open(&json, &context, &SpecOptions::default()).await?;
    driver
        .write(
            &ArraySubset::new_with_shape(vec![4, 4]),
            &SharedArray::from_elements(vec![4, 4], &[1i32; 16])?,
        )
        .await?;

    let resized = driver
        .resize(&[None, None], &[Some(6), None], ResizeOptions::default())
        .await?;
    assert_eq!(resized.domain().shape(), &[6, 4]);
    assert_eq!(stored_json(&context, "r/.zarray").await?["shape"], json!([6, 4]));
    assert_eq!(
        resized
            .read(&ArraySubset::new_with_ranges(&[3..6, 0..1]))
            .await?
            .to_elements::<i32>()?,
        vec![1, 7, 7]
    );

    // The original driver observes the new shape once resolved.
    assert_eq!(driver.domain().shape(), &[4, 4]);
    assert_eq!(driver.resolve().await?.domain().shape(), &[6, 4]);

    let err = resized
        .resize(&[None, None], &[Some(3), None], ResizeOptions {
            expand_only: true,
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
    let err = resized
        .resize(&[Some(1), None], &[None, None], ResizeOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    // Shrinking erases chunks outside of the bounds and resets partially covered chunks.
    let shrunk = resized
        .resize(&[None, None], &[Some(3), None], ResizeOptions {
            shrink_only: true,
            ..Default::default()
        })
        .await?;
    assert_eq!(
        stored_keys(&context).await?,
        vec!["r/.zarray", "r/0.0", "r/0.1", "r/1.0", "r/1.1"]
    );
    let expanded = shrunk
        .resize(&[None, None], &[Some(4), None], ResizeOptions::default())
        .await?;
    assert_eq!(
        expanded
            .read(&ArraySubset::new_with_ranges(&[2..4, 0..4]))
            .await?
            .to_elements::<i32>()?,
        vec![1, 1, 1, 1, 7, 7, 7, 7]
    );

    let shrunk = expanded
        .resize(&[None, None], &[Some(2), None], ResizeOptions::default())
        .await?;
    assert_eq!(shrunk.domain().shape(), &[2, 4]);
    assert_eq!(
        stored_keys(&context).await?,
        vec!["r/.zarray", "r/0.0", "r/0.1"]
    );

    let metadata_only = shrunk
        .resize(&[None, None], &[Some(1), Some(1)], ResizeOptions {
            resize_metadata_only: true,
            ..Default::default()
        })
        .await?;
    assert_eq!(metadata_only.domain().shape(), &[1, 1]);
    assert_eq!(
        stored_keys(&context).await?,
        vec!["r/.zarray", "r/0.0", "r/0.1"]
    );
    Ok(())
}

#[tokio::test]
async fn zarr_resolve_compatibility() -> TestResult {
    let context = Context::default();
    let json = json!({
        "driver": "zarr",
        "path": "c/",
        "metadata": {"shape": [4, 4], "chunks": [2, 2], "dtype": "<i4"},
        "create": true
    });
    let driver = open(&json, &context, &SpecOptions::default()).await?;
    let mut metadata = stored_json(&context, "c/.zarray").await?;

    metadata["shape"] = json!([8, 2]);
    store_json(&context, "c/.zarray", &metadata).await?;
    assert_eq!(driver.resolve().await?.domain().shape(), &[8, 2]);

    metadata["dtype"] = json!("<i8");
    store_json(&context, "c/.zarray", &metadata).await?;
    assert_eq!(
        driver.resolve().await.unwrap_err().kind(),
        ErrorKind::FailedPrecondition
    );

    store_json(&context, "c/.zarray", &json!({"zarr_format": 2})).await?;
    assert_eq!(
        driver.resolve().await.unwrap_err().kind(),
        ErrorKind::FailedPrecondition
    );
    Ok(())
}

#[tokio::test]
async fn zarr_key_encoding() -> TestResult {
    let context = Context::default();
    let json = json!({
        "driver": "zarr",
        "metadata": {"shape": [20, 20], "chunks": [1, 1], "dtype": "|u1"},
        "key_encoding": "/",
        "create": true
    });
    let driver = open(&json, &context, &SpecOptions::default()).await?;
    driver
        .write(
            &ArraySubset::new_with_ranges(&[3..4, 12..13]),
            &SharedArray::from_elements(vec![1, 1], &[42u8])?,
        )
        .await?;
    assert_eq!(stored_keys(&context).await?, vec![".zarray", "3/12"]);

    let conflicting = json!({
        "driver": "zarr",
        "metadata": {"dimension_separator": "."},
        "key_encoding": "/"
    });
    assert_eq!(
        open(&conflicting, &context, &SpecOptions::default())
            .await
            .unwrap_err()
            .kind(),
        ErrorKind::InvalidArgument
    );
    Ok(())
}

#[tokio::test]
async fn zarr_metadata_without_separator() -> TestResult {
    let context = Context::default();
    store_json(
        &context,
        "a/.zarray",
        &json!({
            "zarr_format": 2,
            "shape": [4, 4],
            "chunks": [2, 2],
            "dtype": "<i4",
            "compressor": null,
            "fill_value": 0,
            "order": "C",
            "filters": null
        }),
    )
    .await?;
    let store = context.get::<MemoryKeyValueStore>(&ContextResourceSpec::Default)?;
    let chunk: Vec<u8> = [1i32, 2, 3, 4].iter().flat_map(|v| v.to_le_bytes()).collect();
    store.store().set(&StoreKey::new("a/0/0")?, chunk.into()).await?;

    let region = ArraySubset::new_with_ranges(&[0..2, 0..2]);
    for json in [
        json!({"driver": "zarr", "path": "a/", "key_encoding": "/"}),
        json!({"driver": "zarr", "path": "a/", "metadata": {"dimension_separator": "/"}}),
    ] {
        let driver = open(&json, &context, &SpecOptions::default()).await?;
        assert_eq!(driver.read(&region).await?.to_elements::<i32>()?, vec![1, 2, 3, 4]);
        assert_eq!(driver.spec()?.to_json()["metadata"]["dimension_separator"], "/");
    }

    let driver = open(
        &json!({"driver": "zarr", "path": "a/", "key_encoding": "/"}),
        &context,
        &SpecOptions::default(),
    )
    .await?;
    driver
        .write(
            &ArraySubset::new_with_ranges(&[2..3, 2..3]),
            &SharedArray::from_elements(vec![1, 1], &[5i32])?,
        )
        .await?;
    assert_eq!(
        stored_keys(&context).await?,
        vec!["a/.zarray", "a/0/0", "a/1/1"]
    );

    // Without a separator in the spec, chunk keys use ".".
    let dot = open(&json!({"driver": "zarr", "path": "a/"}), &context, &SpecOptions::default())
        .await?;
    assert_eq!(dot.read(&region).await?.to_elements::<i32>()?, vec![0; 4]);
    assert_eq!(dot.spec()?.to_json()["metadata"]["dimension_separator"], ".");
    Ok(())
}

#[tokio::test]
async fn zarr_abandoned_open_completes() -> TestResult {
    let context = Context::default();
    let json = json!({
        "driver": "zarr",
        "path": "a/",
        "metadata": {"shape": [4, 4], "chunks": [2, 2], "dtype": "<i4"},
        "create": true
    });
    drop(open(&json, &context, &SpecOptions::default()));
    let mut keys = stored_keys(&context).await?;
    for _ in 0..500 {
        if !keys.is_empty() {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
        keys = stored_keys(&context).await?;
    }
    assert_eq!(keys, vec!["a/.zarray"]);

    let driver = open(
        &json!({"driver": "zarr", "path": "a/"}),
        &context,
        &SpecOptions::default(),
    )
    .await?;
    assert_eq!(driver.domain().shape(), &[4, 4]);
    Ok(())
}

#[tokio::test]
async fn zarr_open_rechecks_absent_metadata() -> TestResult {
    let context = Context::default();
    let json = json!({"driver": "zarr", "path": "a/"});
    assert_eq!(
        open(&json, &context, &SpecOptions::default())
            .await
            .unwrap_err()
            .kind(),
        ErrorKind::NotFound
    );

    // Created behind the back of the cache, e.g. by another process.
    store_json(
        &context,
        "a/.zarray",
        &json!({
            "zarr_format": 2,
            "shape": [3],
            "chunks": [2],
            "dtype": "<u2",
            "compressor": null,
            "fill_value": 7,
            "order": "C",
            "filters": null
        }),
    )
    .await?;
    let driver = open(&json, &context, &SpecOptions::default()).await?;
    assert_eq!(driver.domain().shape(), &[3]);
    assert_eq!(
        driver
            .read(&ArraySubset::new_with_ranges(&[0..3]))
            .await?
            .to_elements::<u16>()?,
        vec![7, 7, 7]
    );
    Ok(())
}

#[tokio::test]
async fn zarr_structured_fields() -> TestResult {
    let context = Context::default();
    let json = |field: &str| {
        json!({
            "driver": "zarr",
            "metadata": {
                "shape": [4],
                "chunks": [2],
                "dtype": [["x", "<u2"], ["y", ">f4", [2]]],
                "fill_value": "AAEAAAAAAAAAAA=="
            },
            "field": field
        })
    };
    let y = open(&json("y"), &context, &options(OpenMode::CREATE)).await?;
    assert_eq!(y.rank(), 2);
    assert_eq!(y.domain().shape(), &[4, 2]);
    assert_eq!(y.chunk_layout().read_chunk_shape, vec![2, 2]);
    assert_eq!(y.fill_value(2)?.shape(), &[1, 2]);
    assert_eq!(
        y.fill_value(0).unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );

    let x = open(&json("x"), &context, &SpecOptions::default()).await?;
    assert_eq!(x.rank(), 1);
    assert_eq!(
        x.read(&ArraySubset::new_with_shape(vec![4]))
            .await?
            .to_elements::<u16>()?,
        vec![256; 4]
    );

    y.write(
        &ArraySubset::new_with_ranges(&[1..3]),
        &SharedArray::from_elements(vec![2, 2], &[1.0f32, 2.0, 3.0, 4.0])?,
    )
    .await?;
    assert_eq!(
        y.read(&ArraySubset::new_with_shape(vec![4]))
            .await?
            .to_elements::<f32>()?,
        vec![0.0, 0.0, 1.0, 2.0, 3.0, 4.0, 0.0, 0.0]
    );
    // Writing one field leaves the other at its fill value.
    assert_eq!(
        x.read(&ArraySubset::new_with_shape(vec![4]))
            .await?
            .to_elements::<u16>()?,
        vec![256; 4]
    );

    for field in ["", "z"] {
        assert_eq!(
            open(&json(field), &context, &SpecOptions::default())
                .await
                .unwrap_err()
                .kind(),
            ErrorKind::InvalidArgument
        );
    }
    Ok(())
}

#[tokio::test]
async fn zarr_spec_round_trip() -> TestResult {
    let context = Context::default();
    let json = json!({
        "driver": "zarr",
        "path": "p/",
        "metadata": {"shape": [6], "chunks": [3], "dtype": "<i2", "order": "F"},
        "create": true
    });
    let driver = open(&json, &context, &SpecOptions::default()).await?;
    assert_eq!(driver.codec(), json!({"driver": "zarr", "compressor": null, "filters": null}));

    let spec = driver.spec()?.to_json();
    assert_eq!(spec["driver"], "zarr");
    assert_eq!(spec["path"], "p/");
    assert_eq!(spec["metadata"]["shape"], json!([6]));
    assert_eq!(spec["metadata"]["dtype"], "<i2");
    assert_eq!(spec["metadata"]["order"], "F");
    assert!(spec.get("create").is_none());

    let reopened = Spec::from_json(&spec)?.open(&context).await?;
    assert_eq!(reopened.domain().shape(), &[6]);

    let minimal = Spec::from_json(&json)?
        .apply_options(&SpecOptions {
            minimal_spec: true,
            ..Default::default()
        })?
        .to_json();
    assert!(minimal.get("metadata").is_none());

    assert_eq!(
        Spec::from_json(&json!({"driver": "zarr", "unknown": 1}))
            .unwrap_err()
            .kind(),
        ErrorKind::InvalidArgument
    );
    Ok(())
}

#[tokio::test]
async fn zarr_schema() -> TestResult {
    let context = Context::default();
    let json = json!({
        "driver": "zarr",
        "path": "schema/",
        "schema": {
            "dtype": "uint16",
            "shape": [100, 50],
            "chunk_shape": [10, 10],
            "fill_value": 3,
            "codec": {"driver": "zarr", "compressor": null}
        },
        "create": true
    });
    let driver = open(&json, &context, &SpecOptions::default()).await?;
    let metadata = stored_json(&context, "schema/.zarray").await?;
    assert_eq!(metadata["shape"], json!([100, 50]));
    assert_eq!(metadata["chunks"], json!([10, 10]));
    assert_eq!(metadata["fill_value"], 3);
    assert_eq!(metadata["compressor"], Value::Null);
    assert_eq!(
        driver
            .read(&ArraySubset::new_with_ranges(&[99..100, 49..50]))
            .await?
            .to_elements::<u16>()?,
        vec![3]
    );

    let mismatch = json!({"driver": "zarr", "path": "schema/", "schema": {"fill_value": 4}});
    assert_eq!(
        open(&mismatch, &context, &SpecOptions::default())
            .await
            .unwrap_err()
            .kind(),
        ErrorKind::InvalidArgument
    );
    let mismatch = json!({"driver": "zarr", "path": "schema/", "schema": {"chunk_shape": [5, 5]}});
    assert_eq!(
        open(&mismatch, &context, &SpecOptions::default())
            .await
            .unwrap_err()
            .kind(),
        ErrorKind::InvalidArgument
    );
    Ok(())
}

#[tokio::test]
async fn zarr_compressor() -> TestResult {
    let context = Context::default();
    let unsupported = json!({
        "driver": "zarr",
        "metadata": {"shape": [4], "chunks": [4], "dtype": "<i4", "compressor": {"id": "lz4"}},
        "create": true
    });
    assert_eq!(
        open(&unsupported, &context, &SpecOptions::default())
            .await
            .unwrap_err()
            .kind(),
        ErrorKind::Unimplemented
    );

    #[cfg(feature = "zlib")]
    {
        let json = json!({
            "driver": "zarr",
            "metadata": {"shape": [64], "chunks": [64], "dtype": "<i4", "compressor": {"id": "zlib", "level": 9}},
            "create": true
        });
        let driver = open(&json, &context, &SpecOptions::default()).await?;
        let elements: Vec<i32> = (0..64).collect();
        driver
            .write(
                &ArraySubset::new_with_shape(vec![64]),
                &SharedArray::from_elements(vec![64], &elements)?,
            )
            .await?;
        let store = context.get::<MemoryKeyValueStore>(&ContextResourceSpec::Default)?;
        let stored = store.store().get(&StoreKey::new("0")?).await?.ok_or("missing chunk")?;
        assert_ne!(stored.len(), 64 * 4);
        let reopened = open(&json!({"driver": "zarr"}), &context, &SpecOptions::default()).await?;
        assert_eq!(
            reopened
                .read(&ArraySubset::new_with_shape(vec![64]))
                .await?
                .to_elements::<i32>()?,
            elements
        );
    }
    Ok(())
}
