use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use libephemeral::{
    Code, CreateVolumeRequest, CsiClient, CsiMessage, CsiServer, NodePublishVolumeRequest,
    PluginCapability, VolumeId,
};
use rcgen::{CertificateParams, KeyPair};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

use crate::common::{NODE_ID, TestNode};

const SERVER_NAME: &str = "csi.test";

/// Self-signed CA plus one server certificate signed by it.
struct TestCerts {
    ca_cert_der: CertificateDer<'static>,
    server_cert_der: CertificateDer<'static>,
    server_key_der: Vec<u8>,
}

impl TestCerts {
    fn generate() -> Self {
        let ca_key = KeyPair::generate().expect("generate CA key");
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).expect("CA params");
        ca_params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        let ca_cert = ca_params.self_signed(&ca_key).expect("self-sign CA");

        let server_key = KeyPair::generate().expect("generate server key");
        let mut server_params =
            CertificateParams::new(vec![SERVER_NAME.to_owned()]).expect("server cert params");
        server_params.is_ca = rcgen::IsCa::NoCa;
        let server_cert = server_params
            .signed_by(&server_key, &ca_cert, &ca_key)
            .expect("sign server cert");

        Self {
            ca_cert_der: CertificateDer::from(ca_cert.der().to_vec()),
            server_cert_der: CertificateDer::from(server_cert.der().to_vec()),
            server_key_der: server_key.serialize_der(),
        }
    }

    fn server_config(&self) -> rustls::ServerConfig {
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.server_key_der.clone()));
        rustls::ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_protocol_versions(&[&rustls::version::TLS13])
        .expect("TLS 1.3")
        .with_no_client_auth()
        .with_single_cert(vec![self.server_cert_der.clone()], key)
        .expect("server TLS config")
    }

    fn client_config(&self) -> rustls::ClientConfig {
        let mut roots = rustls::RootCertStore::empty();
        roots.add(self.ca_cert_der.clone()).expect("add CA cert");
        rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_protocol_versions(&[&rustls::version::TLS13])
        .expect("TLS 1.3")
        .with_root_certificates(roots)
        .with_no_client_auth()
    }
}

#[tokio::test]
async fn requests_round_trip_over_quic() {
    let node = TestNode::new().await;
    let mounter = Arc::clone(&node.mounter);
    let target = node.target("quic");
    let certs = TestCerts::generate();

    let addr: SocketAddr = SocketAddr::from(([127, 0, 0, 1], 0));
    let server = Arc::new(
        CsiServer::new(addr, certs.server_config(), Arc::new(node.driver)).expect("server"),
    );
    let local = server.endpoint().local_addr().expect("local addr");
    let serving = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.serve().await })
    };

    let client = CsiClient::connect(local, SERVER_NAME, certs.client_config())
        .await
        .expect("connect");

    assert!(matches!(
        client.call(&CsiMessage::Probe).await,
        Ok(CsiMessage::ProbeResult(true))
    ));
    let Ok(CsiMessage::PluginCapabilitiesResponse(caps)) =
        client.call(&CsiMessage::GetPluginCapabilities).await
    else {
        panic!("expected plugin capabilities");
    };
    assert!(caps.contains(&PluginCapability::ControllerService));

    let created = match client
        .call(&CsiMessage::CreateVolume(CreateVolumeRequest {
            name: "over-quic".into(),
            required_bytes: 1 << 20,
            ..Default::default()
        }))
        .await
    {
        Ok(CsiMessage::VolumeCreated(resp)) => resp,
        other => panic!("expected VolumeCreated, got {other:?}"),
    };
    assert_eq!(created.capacity_bytes, 1 << 20);
    assert_eq!(
        created.accessible_topology[0].segments.get("node").map(String::as_str),
        Some(NODE_ID)
    );

    let published = client
        .call(&CsiMessage::NodePublishVolume(NodePublishVolumeRequest {
            volume_id: created.volume_id.clone(),
            target_path: target.clone(),
            ..Default::default()
        }))
        .await;
    assert!(matches!(published, Ok(CsiMessage::Ok)));
    assert!(mounter.mounted_source(Path::new(&target)).is_some());

    // Failures come back as a status carrying the mapped code.
    let err = client
        .call(&CsiMessage::DeleteVolume(created.volume_id.clone()))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::FailedPrecondition);

    let err = client
        .call(&CsiMessage::NodeGetVolumeStats(VolumeId::from("vol-nope")))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);

    let err = client
        .call(&CsiMessage::CreateSnapshot {
            source_volume_id: created.volume_id.clone(),
            name: "snap".into(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Unimplemented);

    assert!(matches!(
        client
            .call(&CsiMessage::NodeUnpublishVolume {
                volume_id: created.volume_id.clone(),
                target_path: target.clone(),
            })
            .await,
        Ok(CsiMessage::Ok)
    ));
    assert!(matches!(
        client.call(&CsiMessage::DeleteVolume(created.volume_id)).await,
        Ok(CsiMessage::Ok)
    ));
    assert!(matches!(
        client.call(&CsiMessage::ListVolumes).await,
        Ok(CsiMessage::VolumeList(vols)) if vols.is_empty()
    ));

    client.close().await;
    server.close();
    serving.await.unwrap().unwrap();
}

#[tokio::test]
async fn concurrent_requests_share_one_connection() {
    let node = TestNode::new().await;
    let certs = TestCerts::generate();
    let server = Arc::new(
        CsiServer::new(
            SocketAddr::from(([127, 0, 0, 1], 0)),
            certs.server_config(),
            Arc::new(node.driver),
        )
        .expect("server"),
    );
    let local = server.endpoint().local_addr().expect("local addr");
    let serving = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.serve().await })
    };

    let client = Arc::new(
        CsiClient::connect(local, SERVER_NAME, certs.client_config())
            .await
            .expect("connect"),
    );
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                client
                    .call(&CsiMessage::CreateVolume(CreateVolumeRequest {
                        name: format!("parallel-{i}"),
                        ..Default::default()
                    }))
                    .await
            })
        })
        .collect();
    for handle in handles {
        assert!(matches!(
            handle.await.unwrap(),
            Ok(CsiMessage::VolumeCreated(_))
        ));
    }

    assert!(matches!(
        client.call(&CsiMessage::ListVolumes).await,
        Ok(CsiMessage::VolumeList(vols)) if vols.len() == 8
    ));

    client.close().await;
    server.close();
    serving.await.unwrap().unwrap();
}
