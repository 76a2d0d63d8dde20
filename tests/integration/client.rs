//! Client helpers against a live server.

use crate::*;

use oscquery::{fetch_host_info, fetch_tree, Access, OscValue};

#[tokio::test]
async fn fetch_tree_rebuilds_the_index() -> Result<()> {
    let (service, port) = serving("Remote").await?;
    service.add_endpoint(
        "/avatar/parameters/Foo",
        "f",
        Access::ReadWrite,
        Some(vec![OscValue::Float(0.5)]),
        "foo level",
    )?;
    service.add_endpoint_typed::<bool>("/avatar/parameters/Bar", Access::Read, None, "")?;

    let tree = fetch_tree(LOCALHOST, port, None).await?;
    let foo = tree.get("/avatar/parameters/Foo").context("Foo missing")?;
    assert_eq!(foo.osc_type(), Some("f"));
    assert_eq!(foo.access(), Access::ReadWrite);
    assert_eq!(foo.description(), Some("foo level"));
    // Floats come back at double width.
    assert_eq!(foo.value(), Some(vec![OscValue::Double(0.5)]));
    assert_eq!(tree.get("/avatar/parameters/Bar").context("Bar missing")?.osc_type(), Some("T"));
    assert_eq!(tree.paths(), service.tree().paths());

    // A subtree, requested without the leading slash.
    let sub = fetch_tree(LOCALHOST, port, Some("avatar/parameters")).await?;
    assert!(sub.contains("/avatar/parameters/Foo"));

    service.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn fetch_host_info_matches_service() -> Result<()> {
    let (service, port) = serving("Remote").await?;
    service.advertise_osc(9123)?;

    let info = fetch_host_info(LOCALHOST, port).await?;
    assert_eq!(info, service.host_info());
    assert_eq!(info.osc_endpoint(), Some("127.0.0.1:9123".parse()?));

    service.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn fetch_from_a_missing_path_fails() -> Result<()> {
    let (service, port) = serving("Remote").await?;
    assert!(fetch_tree(LOCALHOST, port, Some("/nope")).await.is_err());
    service.shutdown().await;
    Ok(())
}
