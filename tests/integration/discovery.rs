//! Two services finding each other over the in-memory link.

use crate::*;

use std::time::Duration;

use oscquery::{PeerEvents, ServiceProfile, ServiceType};

async fn next(events: &mut PeerEvents) -> Result<ServiceProfile> {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .context("timed out waiting for a peer event")?
        .context("event stream closed")
}

#[tokio::test]
async fn services_discover_each_other() -> Result<()> {
    let link = Link::new();
    let a = service_on(&link, "Alpha");
    let b = service_on(&link, "Beta");
    let mut b_sees = b.subscribe_oscquery();

    let a_port = a.start_http(0, true).await?;

    let seen = next(&mut b_sees).await?;
    assert_eq!(
        seen,
        ServiceProfile::new("Alpha", LOCALHOST, a_port, ServiceType::OscQuery)
    );
    assert_eq!(b.oscquery_services(), vec![seen.clone()]);

    // The discovered profile leads straight to the peer's host info.
    let info = oscquery::fetch_host_info(seen.address, seen.port).await?;
    assert_eq!(info.name, "Alpha");

    a.shutdown().await;
    b.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn late_subscriber_gets_known_peers() -> Result<()> {
    let link = Link::new();
    let a = service_on(&link, "Alpha");
    let b = service_on(&link, "Beta");

    a.advertise_osc(9000)?;
    let mut osc = b.subscribe_osc();
    let seen = next(&mut osc).await?;
    assert_eq!(seen.name, "Alpha");
    assert_eq!(seen.service_type, ServiceType::Osc);
    assert!(b.oscquery_services().is_empty());

    a.shutdown().await;
    b.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn goodbye_expires_the_peer() -> Result<()> {
    let link = Link::new();
    let a = service_on(&link, "Alpha");
    let b = service_on(&link, "Beta");
    let mut removed = b.subscribe_removed();

    a.advertise_osc(9000)?;
    assert_eq!(b.osc_services().len(), 1);

    a.shutdown().await;
    let gone = next(&mut removed).await?;
    assert_eq!(gone.name, "Alpha");
    assert!(b.osc_services().is_empty());

    b.shutdown().await;
    Ok(())
}
