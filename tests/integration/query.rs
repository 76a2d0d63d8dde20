//! HTTP query protocol against a live listener.

use crate::*;

use oscquery::{Access, OscValue};

async fn get(url: &str) -> Result<(reqwest::StatusCode, reqwest::header::HeaderMap, String)> {
    let resp = reqwest::get(url).await?;
    let status = resp.status();
    let headers = resp.headers().clone();
    Ok((status, headers, resp.text().await?))
}

#[tokio::test]
async fn value_and_full_node() -> Result<()> {
    let (service, port) = serving("Avatar").await?;
    service.add_endpoint(
        "/avatar/parameters/Foo",
        "f",
        Access::ReadWrite,
        Some(vec![OscValue::Float(0.5)]),
        "",
    )?;

    let (status, headers, body) = get(&url(port, "/avatar/parameters/Foo?VALUE")).await?;
    assert_eq!(status, 200);
    assert_eq!(headers["pragma"], "no-cache");
    assert_eq!(serde_json::from_str::<serde_json::Value>(&body)?, serde_json::json!([0.5]));

    let (_, _, body) = get(&url(port, "/avatar/parameters/Foo")).await?;
    let node: serde_json::Value = serde_json::from_str(&body)?;
    assert_eq!(node["TYPE"], "f");
    assert_eq!(node["ACCESS"], 3);
    assert_eq!(node["FULL_PATH"], "/avatar/parameters/Foo");

    service.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn errors() -> Result<()> {
    let (service, port) = serving("Avatar").await?;
    service.add_endpoint("/avatar/parameters/Foo", "f", Access::ReadWrite, None, "")?;

    let (status, _, _) = get(&url(port, "/nope")).await?;
    assert_eq!(status, 404);

    let (status, _, body) = get(&url(port, "/avatar/parameters/Foo?BOGUS")).await?;
    assert_eq!(status, 400);
    assert!(body.contains("BOGUS"), "body was {body:?}");

    service.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn host_info_route_and_keyword() -> Result<()> {
    let (service, port) = serving("Lights").await?;
    service.advertise_osc(9000)?;

    for path in ["/HOST_INFO", "/?HOST_INFO", "/any/path?HOST_INFO"] {
        let (status, headers, body) = get(&url(port, path)).await?;
        assert_eq!(status, 200, "{path}");
        assert_eq!(headers["pragma"], "no-cache");
        let info: serde_json::Value = serde_json::from_str(&body)?;
        assert_eq!(info["NAME"], "Lights");
        assert_eq!(info["OSC_IP"], "127.0.0.1");
        assert_eq!(info["OSC_PORT"], 9000);
    }

    service.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn live_changes_are_visible() -> Result<()> {
    let (service, port) = serving("Mixer").await?;

    service.set_value("/mix/gain", vec![OscValue::Float(0.25)])?;
    let (_, _, body) = get(&url(port, "/mix/gain?VALUE")).await?;
    assert_eq!(body, "[0.25]");

    service.set_value("/mix/gain", vec![OscValue::Float(0.75)])?;
    let (_, _, body) = get(&url(port, "/mix/gain?VALUE")).await?;
    assert_eq!(body, "[0.75]");

    assert!(service.remove_endpoint("/mix/gain"));
    let (status, _, _) = get(&url(port, "/mix/gain")).await?;
    assert_eq!(status, 404);

    service.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn removed_parent_leaves_children_addressable() -> Result<()> {
    let (service, port) = serving("Synth").await?;
    service.add_endpoint("/synth/osc1", "f", Access::ReadWrite, None, "")?;
    service.add_endpoint("/synth/osc1/detune", "f", Access::ReadWrite, None, "")?;

    assert!(service.remove_endpoint("/synth/osc1"));

    // Exact lookup still finds the child; walking from the root does not.
    let (status, _, _) = get(&url(port, "/synth/osc1/detune?TYPE")).await?;
    assert_eq!(status, 200);
    let (_, _, body) = get(&url(port, "/synth")).await?;
    let synth: serde_json::Value = serde_json::from_str(&body)?;
    assert!(synth.get("CONTENTS").is_none());

    service.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn concurrent_readers_and_writer() -> Result<()> {
    let (service, port) = serving("Busy").await?;
    let service = Arc::new(service);

    let writer = {
        let service = service.clone();
        tokio::spawn(async move {
            for i in 0..200 {
                let path = format!("/bulk/p{i}");
                service
                    .add_endpoint(&path, "i", Access::Read, Some(vec![OscValue::Int(i)]), "")
                    .unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    let mut readers = Vec::new();
    for _ in 0..4 {
        readers.push(tokio::spawn(async move {
            for _ in 0..25 {
                let resp = reqwest::get(url(port, "/")).await.unwrap();
                assert_eq!(resp.status(), 200);
                // Every snapshot parses as a complete tree.
                let tree = oscquery::OscTree::from_slice(&resp.bytes().await.unwrap()).unwrap();
                for path in tree.paths() {
                    assert!(path == "/" || path.starts_with("/bulk"));
                }
            }
        }));
    }

    writer.await?;
    for r in readers {
        r.await?;
    }
    assert_eq!(service.tree().len(), 1 + 1 + 200);

    service.shutdown().await;
    Ok(())
}
