use super::*;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use site_controller_k8s_api::{ConnectorSpec, ListenerSpec};
use std::sync::Arc;

#[derive(Clone, Default)]
struct MockPatcher {
    patched: Arc<Mutex<Vec<Update>>>,
}

#[async_trait::async_trait]
impl PatchStatus for MockPatcher {
    async fn patch_status(&self, update: &Update) -> Result<()> {
        match update.name.as_str() {
            "slow" => time::sleep(Duration::from_secs(60)).await,
            "missing" => anyhow::bail!("not found"),
            _ => {}
        }
        self.patched.lock().push(update.clone());
        Ok(())
    }
}

fn connector(name: &str) -> Connector {
    let mut connector = Connector::new(
        name,
        ConnectorSpec {
            routing_key: name.to_string(),
            host: Some("db.example.com".to_string()),
            selector: None,
            port: 5432,
            include_not_ready: false,
            type_: None,
            tls_credentials: None,
        },
    );
    connector.metadata.namespace = Some("ns-0".to_string());
    connector
}

#[test]
fn update_identifies_binding() {
    let update = Update::connector(&connector("db"), BindingStatus::ok());
    assert_eq!(
        update,
        Update {
            kind: Kind::Connector,
            namespace: "ns-0".to_string(),
            name: "db".to_string(),
            status: BindingStatus::ok(),
        }
    );

    let listener = Listener::new(
        "web",
        ListenerSpec {
            routing_key: "web".to_string(),
            host: "web".to_string(),
            port: 8080,
            type_: None,
            tls_credentials: None,
        },
    );
    let update = Update::listener(&listener, BindingStatus::ok());
    assert_eq!(update.kind, Kind::Listener);
    assert_eq!(update.namespace, "");
}

#[tokio::test(start_paused = true)]
async fn applies_updates_in_order() {
    let patcher = MockPatcher::default();
    let metrics = ControllerMetrics::default();
    let (tx, rx) = mpsc::unbounded_channel();
    let controller = Controller::new(
        patcher.clone(),
        rx,
        Duration::from_secs(5),
        metrics.clone(),
    );

    let failed = BindingStatus {
        status: Some("No matches for selector".to_string()),
    };
    tx.send(Update::connector(&connector("db"), failed.clone()))
        .unwrap();
    tx.send(Update::connector(&connector("slow"), BindingStatus::ok()))
        .unwrap();
    tx.send(Update::connector(&connector("missing"), BindingStatus::ok()))
        .unwrap();
    tx.send(Update::connector(&connector("db"), BindingStatus::ok()))
        .unwrap();
    drop(tx);
    controller.run().await;

    let patched = patcher.patched.lock();
    assert_eq!(
        patched.iter().map(|u| u.status.clone()).collect::<Vec<_>>(),
        vec![failed, BindingStatus::ok()]
    );
    assert_eq!(metrics.patch_succeeded.get(), 2);
    assert_eq!(metrics.patch_timeout.get(), 1);
    assert_eq!(metrics.patch_failed.get(), 1);
}
