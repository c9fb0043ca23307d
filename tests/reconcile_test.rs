use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::path::PathBuf;

use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::x509::{X509Builder, X509NameBuilder, X509Req, X509};

use sdcore_nms::aggregate::endpoint;
use sdcore_nms::applied::MemoryAppliedStore;
use sdcore_nms::definition::CharmDefinition;
use sdcore_nms::error::CharmError;
use sdcore_nms::hook::{EventKind, RelationHook};
use sdcore_nms::interfaces::fiveg_core_gnb::{GnbConfig, PlmnConfig};
use sdcore_nms::interfaces::fiveg_n4::UpfEndpoint;
use sdcore_nms::interfaces::ingress::IngressUrl;
use sdcore_nms::interfaces::tls_certificates::{
    CertificateRequests, IssuedCertificates, ProviderCertificate,
};
use sdcore_nms::interfaces::{bag, Decoded, Payload};
use sdcore_nms::model::{BagScope, DataBag, ModelSnapshot, Relation, RelationId, RelationSet, UnitInfo};
use sdcore_nms::nms::{
    InventoryGnb, NetworkSlice, NmsApi, NmsStatus, SliceGnb, DEFAULT_TAC, LOGIN_SECRET_LABEL,
};
use sdcore_nms::pebble::Layer;
use sdcore_nms::reconciler::{Outcome, Phase, Reconciler};
use sdcore_nms::render::{CA_PATH, CERTIFICATE_PATH, CONFIG_PATH, CSR_PATH, PRIVATE_KEY_PATH, SERVICE};
use sdcore_nms::runtime::{Runtime, StatusKind, UnitStatus};
use sdcore_nms::tls;
use sdcore_nms::workload::Workload;

const APP: &str = "sdcore-nms-k8s";
const CERTIFICATES_ID: u32 = 4;
const UPF_ID: u32 = 5;

#[derive(Debug, Default)]
struct FakeWorkload {
    reachable: bool,
    storage: bool,
    files: BTreeMap<String, Vec<u8>>,

    /// Paths pushed to, in order
    writes: Vec<String>,
    plan: Layer,
    layers_added: usize,
    restarts: usize,

    /// Pushes to this path fail
    broken_path: Option<String>,

    /// Number of upcoming restarts that fail
    failing_restarts: usize,
}

impl FakeWorkload {
    fn ready() -> Self {
        Self {
            reachable: true,
            storage: true,
            ..Default::default()
        }
    }

    fn writes_to(&self, path: &str) -> usize {
        self.writes.iter().filter(|p| p.as_str() == path).count()
    }

    fn file(&self, path: &str) -> String {
        String::from_utf8(self.files[path].clone()).unwrap()
    }

    fn check(&self) -> Result<(), CharmError> {
        if self.reachable {
            Ok(())
        } else {
            Err(CharmError::WorkloadUnavailable("unreachable".into()))
        }
    }
}

impl Workload for FakeWorkload {
    fn can_connect(&self) -> bool {
        self.reachable
    }

    fn storage_attached(&self) -> bool {
        self.storage
    }

    fn exists(&self, path: &str) -> Result<bool, CharmError> {
        self.check()?;
        Ok(self.files.contains_key(path))
    }

    fn pull(&self, path: &str) -> Result<Option<Vec<u8>>, CharmError> {
        self.check()?;
        Ok(self.files.get(path).cloned())
    }

    fn push(&mut self, path: &str, content: &[u8]) -> Result<(), CharmError> {
        self.check()?;
        if self.broken_path.as_deref() == Some(path) {
            return Err(CharmError::WorkloadUnavailable(format!("can't write {}", path)));
        }
        self.files.insert(path.into(), content.to_vec());
        self.writes.push(path.into());
        Ok(())
    }

    fn remove(&mut self, path: &str) -> Result<(), CharmError> {
        self.check()?;
        self.files.remove(path);
        Ok(())
    }

    fn plan(&self) -> Result<Layer, CharmError> {
        self.check()?;
        Ok(self.plan.clone())
    }

    fn add_layer(&mut self, _label: &str, layer: &Layer) -> Result<(), CharmError> {
        self.check()?;
        self.plan.services.extend(layer.services.clone());
        self.plan.log_targets.extend(layer.log_targets.clone());
        self.layers_added += 1;
        Ok(())
    }

    fn restart(&mut self, service: &str) -> Result<(), CharmError> {
        self.check()?;
        self.restarts += 1;
        if self.failing_restarts > 0 {
            self.failing_restarts -= 1;
            return Err(CharmError::WorkloadUnavailable(format!("can't restart {}", service)));
        }
        Ok(())
    }

    fn is_running(&self, service: &str) -> Result<bool, CharmError> {
        self.check()?;
        Ok(self.plan.services.contains_key(service))
    }
}

/// Runtime whose publishes show up in the next snapshot, like relation-set followed by a new hook
#[derive(Debug, Default)]
struct FakeRuntime {
    snapshot: ModelSnapshot,
    published: Vec<(RelationId, BagScope, DataBag)>,
    statuses: Vec<UnitStatus>,
    secrets: BTreeMap<String, DataBag>,
}

impl FakeRuntime {
    fn new(is_leader: bool) -> Self {
        let unit = UnitInfo {
            app_name: APP.into(),
            unit_name: format!("{}/0", APP),
            model_name: "sdcore".into(),
            is_leader,
            fqdn: format!("{}-0.{}-endpoints.sdcore.svc.cluster.local", APP, APP),
            pod_ip: Some("10.1.1.1".into()),
        };

        Self {
            snapshot: ModelSnapshot {
                unit,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn relations(&self) -> Vec<Relation> {
        self.snapshot.relations.iter().cloned().collect()
    }

    fn relate(&mut self, relation: Relation) {
        let mut relations = self.relations();
        relations.push(relation);
        self.snapshot.relations = RelationSet::new(relations);
    }

    fn unrelate(&mut self, id: u32) {
        let relations = self
            .relations()
            .into_iter()
            .filter(|r| r.id != RelationId(id))
            .collect();
        self.snapshot.relations = RelationSet::new(relations);
    }

    fn set_remote_app_data(&mut self, id: u32, data: DataBag) {
        let mut relations = self.relations();
        for relation in relations.iter_mut().filter(|r| r.id == RelationId(id)) {
            relation.remote_app_data = data.clone();
        }
        self.snapshot.relations = RelationSet::new(relations);
    }

    fn relation(&self, id: u32) -> &Relation {
        self.snapshot.relations.get(RelationId(id)).unwrap()
    }
}

impl Runtime for FakeRuntime {
    fn snapshot(&self, _definition: &CharmDefinition) -> Result<ModelSnapshot, CharmError> {
        Ok(self.snapshot.clone())
    }

    fn publish(
        &mut self,
        relation: RelationId,
        scope: BagScope,
        data: &DataBag,
    ) -> Result<(), CharmError> {
        let mut relations = self.relations();
        let target = relations
            .iter_mut()
            .find(|r| r.id == relation)
            .ok_or_else(|| CharmError::UnknownEndpoint(relation.to_string()))?;
        match scope {
            BagScope::App => target.local_app_data.extend(data.clone()),
            BagScope::Unit => target.local_unit_data.extend(data.clone()),
        }
        self.snapshot.relations = RelationSet::new(relations);
        self.published.push((relation, scope, data.clone()));
        Ok(())
    }

    fn set_status(&mut self, status: &UnitStatus) -> Result<(), CharmError> {
        self.statuses.push(status.clone());
        Ok(())
    }

    fn get_secret(&self, label: &str) -> Result<Option<DataBag>, CharmError> {
        Ok(self.secrets.get(label).cloned())
    }

    fn set_secret(&mut self, label: &str, content: &DataBag) -> Result<(), CharmError> {
        self.secrets.insert(label.into(), content.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
struct FakeNms {
    available: bool,
    initialized: Cell<bool>,
    users: RefCell<Vec<(String, String)>>,
    logins: Cell<usize>,
    slices: BTreeMap<String, NetworkSlice>,

    /// Inventory, gNB name to TAC and UPF hostname to port
    gnbs: RefCell<BTreeMap<String, u32>>,
    upfs: RefCell<BTreeMap<String, u16>>,
    upf_updates: Cell<usize>,
}

impl FakeNms {
    fn up() -> Self {
        Self {
            available: true,
            ..Default::default()
        }
    }

    fn check(&self) -> Result<(), CharmError> {
        if self.available {
            Ok(())
        } else {
            Err(CharmError::WorkloadUnavailable("connection refused".into()))
        }
    }
}

impl NmsApi for FakeNms {
    fn status(&self) -> Result<NmsStatus, CharmError> {
        self.check()?;
        Ok(NmsStatus {
            initialized: self.initialized.get(),
        })
    }

    fn create_first_user(&self, username: &str, password: &str) -> Result<(), CharmError> {
        self.check()?;
        self.users
            .borrow_mut()
            .push((username.into(), password.into()));
        self.initialized.set(true);
        Ok(())
    }

    fn login(&self, username: &str, password: &str) -> Result<Option<String>, CharmError> {
        self.check()?;
        let known = self
            .users
            .borrow()
            .iter()
            .any(|(u, p)| u == username && p == password);
        if !known {
            return Ok(None);
        }
        self.logins.set(self.logins.get() + 1);
        Ok(Some(format!("token-{}", self.logins.get())))
    }

    fn token_is_valid(&self, token: &str) -> bool {
        self.available && token.starts_with("token-")
    }

    fn list_network_slices(&self, _token: &str) -> Result<Vec<String>, CharmError> {
        self.check()?;
        Ok(self.slices.keys().cloned().collect())
    }

    fn get_network_slice(&self, name: &str, _token: &str) -> Result<NetworkSlice, CharmError> {
        self.check()?;
        self.slices
            .get(name)
            .cloned()
            .ok_or_else(|| CharmError::WorkloadUnavailable(format!("no slice {}", name)))
    }

    fn list_gnbs(&self, _token: &str) -> Result<Vec<InventoryGnb>, CharmError> {
        self.check()?;
        Ok(self
            .gnbs
            .borrow()
            .iter()
            .map(|(name, tac)| InventoryGnb {
                name: name.clone(),
                tac: *tac,
            })
            .collect())
    }

    fn create_gnb(&self, name: &str, tac: u32, _token: &str) -> Result<(), CharmError> {
        self.check()?;
        self.gnbs.borrow_mut().insert(name.into(), tac);
        Ok(())
    }

    fn delete_gnb(&self, name: &str, _token: &str) -> Result<(), CharmError> {
        self.check()?;
        self.gnbs.borrow_mut().remove(name);
        Ok(())
    }

    fn list_upfs(&self, _token: &str) -> Result<Vec<UpfEndpoint>, CharmError> {
        self.check()?;
        Ok(self
            .upfs
            .borrow()
            .iter()
            .map(|(hostname, port)| UpfEndpoint {
                hostname: hostname.clone(),
                port: *port,
            })
            .collect())
    }

    fn create_upf(&self, upf: &UpfEndpoint, _token: &str) -> Result<(), CharmError> {
        self.check()?;
        self.upfs.borrow_mut().insert(upf.hostname.clone(), upf.port);
        Ok(())
    }

    fn update_upf(&self, upf: &UpfEndpoint, _token: &str) -> Result<(), CharmError> {
        self.check()?;
        self.upf_updates.set(self.upf_updates.get() + 1);
        self.upfs.borrow_mut().insert(upf.hostname.clone(), upf.port);
        Ok(())
    }

    fn delete_upf(&self, hostname: &str, _token: &str) -> Result<(), CharmError> {
        self.check()?;
        self.upfs.borrow_mut().remove(hostname);
        Ok(())
    }
}

/// A throwaway CA standing in for the certificates provider
struct TestCa {
    key: PKey<Private>,
    certificate: X509,
}

impl TestCa {
    fn new() -> Self {
        let key_pem = tls::generate_private_key().unwrap();
        let key = PKey::private_key_from_pem(key_pem.as_bytes()).unwrap();

        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_text("CN", "test-ca").unwrap();
        let name = name.build();

        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        builder.set_serial_number(&serial()).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(3650).unwrap())
            .unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();

        Self {
            key,
            certificate: builder.build(),
        }
    }

    fn pem(&self) -> String {
        String::from_utf8(self.certificate.to_pem().unwrap()).unwrap()
    }

    /// Signs `csr_pem`, valid for `days`
    fn sign(&self, csr_pem: &str, days: u32) -> String {
        let csr = X509Req::from_pem(csr_pem.as_bytes()).unwrap();

        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        builder.set_serial_number(&serial()).unwrap();
        builder.set_subject_name(csr.subject_name()).unwrap();
        builder
            .set_issuer_name(self.certificate.subject_name())
            .unwrap();
        builder.set_pubkey(&csr.public_key().unwrap()).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(days).unwrap())
            .unwrap();
        builder.sign(&self.key, MessageDigest::sha256()).unwrap();

        String::from_utf8(builder.build().to_pem().unwrap()).unwrap()
    }
}

fn serial() -> openssl::asn1::Asn1Integer {
    let mut serial = BigNum::new().unwrap();
    serial.rand(64, MsbOption::MAYBE_ZERO, false).unwrap();
    serial.to_asn1_integer().unwrap()
}

fn database(id: u32, ep: &str, host: &str) -> Relation {
    Relation::new(id, ep, "mongodb_client").with_remote_app(
        "mongodb",
        bag(vec![
            ("username", "relation-1"),
            ("password", "secret"),
            ("uris", format!("mongodb://{}:27017", host).as_str()),
        ]),
    )
}

fn upf(id: u32, hostname: &str, port: u16) -> Relation {
    let data = UpfEndpoint {
        hostname: hostname.into(),
        port,
    }
    .encode();
    Relation::new(id, endpoint::FIVEG_N4, "fiveg_n4").with_remote_app("upf", data)
}

fn certificates() -> Relation {
    Relation::new(CERTIFICATES_ID, endpoint::CERTIFICATES, "tls-certificates")
        .with_remote_app("self-signed-certificates", DataBag::new())
}

fn databases() -> Vec<Relation> {
    vec![
        database(1, endpoint::COMMON_DATABASE, "1.1.1.1"),
        database(2, endpoint::AUTH_DATABASE, "2.2.2.2"),
        database(3, endpoint::WEBUI_DATABASE, "3.3.3.3"),
    ]
}

struct Harness {
    definition: CharmDefinition,
    reconciler: Reconciler<FakeWorkload, FakeRuntime, MemoryAppliedStore, FakeNms>,
    ca: TestCa,
}

impl Harness {
    fn new(workload: FakeWorkload, runtime: FakeRuntime) -> Self {
        let definition = CharmDefinition::load(PathBuf::from("charm")).unwrap();
        let reconciler = Reconciler::new(
            definition.clone(),
            workload,
            runtime,
            MemoryAppliedStore::default(),
        );

        Self {
            definition,
            reconciler,
            ca: TestCa::new(),
        }
    }

    /// Leader unit with every mandatory relation and a reachable workload
    fn related() -> Self {
        let mut runtime = FakeRuntime::new(true);
        for relation in databases() {
            runtime.relate(relation);
        }
        runtime.relate(certificates());
        runtime.relate(upf(UPF_ID, "upf.sdcore.svc.cluster.local", 8805));
        Self::new(FakeWorkload::ready(), runtime)
    }

    /// Related, with a certificate issued and the NMS configured
    fn active() -> Self {
        let mut harness = Self::related();
        harness.pass();
        harness.issue_certificate(365);
        let outcome = harness.pass();
        assert_eq!(outcome.phase, Phase::Active);
        harness
    }

    fn with_nms(mut self, nms: FakeNms) -> Self {
        self.reconciler = self.reconciler.with_nms(nms);
        self
    }

    fn handle(&mut self, event: EventKind) -> Outcome {
        let snapshot = self
            .reconciler
            .runtime()
            .snapshot(&self.definition)
            .unwrap();
        self.reconciler.handle_event(&event, &snapshot)
    }

    fn pass(&mut self) -> Outcome {
        self.handle(EventKind::ConfigChanged)
    }

    fn workload(&self) -> &FakeWorkload {
        self.reconciler.workload()
    }

    fn runtime(&self) -> &FakeRuntime {
        self.reconciler.runtime()
    }

    fn runtime_mut(&mut self) -> &mut FakeRuntime {
        self.reconciler.runtime_mut()
    }

    /// CSRs currently published in our unit bag on the certificates relation
    fn published_csrs(&self) -> CertificateRequests {
        let relation = self.runtime().relation(CERTIFICATES_ID);
        CertificateRequests::decode(&relation.local_unit_data)
            .unwrap()
            .complete()
            .unwrap()
    }

    /// Has the provider sign every CSR we published
    fn issue_certificate(&mut self, days: u32) -> String {
        let csr = self.published_csrs().requests[0]
            .certificate_signing_request
            .clone();
        let certificate = self.ca.sign(&csr, days);

        let issued = IssuedCertificates {
            certificates: vec![ProviderCertificate {
                certificate: certificate.clone(),
                certificate_signing_request: csr,
                ca: self.ca.pem(),
                chain: vec![self.ca.pem()],
                revoked: false,
            }],
        };
        self.runtime_mut()
            .set_remote_app_data(CERTIFICATES_ID, issued.encode());
        certificate
    }
}

fn relation_event(ep: &str, hook: RelationHook) -> EventKind {
    EventKind::Relation {
        endpoint: ep.into(),
        hook,
    }
}

#[test]
fn blocked_without_relations() {
    let mut harness = Harness::new(FakeWorkload::ready(), FakeRuntime::new(true));

    let outcome = harness.pass();

    assert_eq!(outcome.phase, Phase::Blocked);
    assert_eq!(
        outcome.status,
        UnitStatus::blocked("Waiting for common_database relation to be created")
    );
    assert_eq!(harness.runtime().statuses, vec![outcome.status]);
    assert!(harness.workload().writes.is_empty());
}

#[test]
fn blocked_without_certificates() {
    let mut runtime = FakeRuntime::new(true);
    for relation in databases() {
        runtime.relate(relation);
    }
    let mut harness = Harness::new(FakeWorkload::ready(), runtime);

    let outcome = harness.pass();

    assert_eq!(outcome.phase, Phase::Blocked);
    assert_eq!(
        outcome.status,
        UnitStatus::blocked("Waiting for certificates relation to be created")
    );
    assert!(harness.workload().writes.is_empty());
}

#[test]
fn waits_for_workload() {
    let mut harness = Harness::related();
    harness.reconciler.workload_mut().reachable = false;

    let outcome = harness.pass();

    assert_eq!(outcome.phase, Phase::WaitingOnWorkload);
    assert_eq!(outcome.status.kind, StatusKind::Waiting);
    assert!(harness.workload().writes.is_empty());
    assert_eq!(harness.reconciler.applied().writes, 0);

    harness.reconciler.workload_mut().reachable = true;
    harness.reconciler.workload_mut().storage = false;

    let outcome = harness.pass();
    assert_eq!(
        outcome.status,
        UnitStatus::waiting("Waiting for storage to be attached")
    );
    assert!(harness.workload().writes.is_empty());
}

#[test]
fn first_apply() {
    let mut harness = Harness::related();

    let outcome = harness.pass();
    assert_eq!(outcome.phase, Phase::WaitingOnWorkload);
    assert_eq!(
        outcome.status,
        UnitStatus::waiting("Waiting for certificates to be available")
    );
    assert_eq!(harness.workload().writes_to(PRIVATE_KEY_PATH), 1);
    assert_eq!(harness.workload().writes_to(CSR_PATH), 1);
    assert_eq!(harness.workload().writes_to(CONFIG_PATH), 0);
    assert_eq!(harness.published_csrs().requests.len(), 1);

    let certificate = harness.issue_certificate(365);
    let outcome = harness.pass();

    assert_eq!(outcome.phase, Phase::Active);
    assert_eq!(outcome.status, UnitStatus::active());

    let workload = harness.workload();
    assert_eq!(workload.writes_to(CONFIG_PATH), 1);
    assert_eq!(workload.restarts, 1);
    assert_eq!(workload.layers_added, 1);
    assert_eq!(workload.file(CERTIFICATE_PATH), certificate);
    assert_eq!(workload.file(CA_PATH), harness.ca.pem());

    let config = workload.file(CONFIG_PATH);
    assert!(config.contains("mongodb://1.1.1.1:27017"));
    assert!(!config.contains("upf.sdcore.svc.cluster.local"));

    let environment = &workload.plan.services[SERVICE].environment;
    assert_eq!(environment["WEBUI_ENDPOINT"], "10.1.1.1:5000");

    let applied = harness.reconciler.applied();
    assert_eq!(applied.writes, 1);
    let record = applied.record.as_ref().unwrap();
    assert_eq!(record.common_database.name, "free5gc");
    assert_eq!(record.auth_database.name, "authentication");
    assert_eq!(record.webui_database.name, "webui");
    assert_eq!(record.upfs[0].hostname, "upf.sdcore.svc.cluster.local");
}

#[test]
fn peer_update_rewrites_config() {
    let mut harness = Harness::active();

    harness.runtime_mut().set_remote_app_data(
        1,
        database(1, endpoint::COMMON_DATABASE, "1.1.1.2").remote_app_data,
    );
    let outcome = harness.pass();

    assert_eq!(outcome.phase, Phase::Active);
    let workload = harness.workload();
    assert_eq!(workload.writes_to(CONFIG_PATH), 2);
    assert_eq!(workload.writes_to(CERTIFICATE_PATH), 1);
    assert_eq!(workload.restarts, 2);

    let config = workload.file(CONFIG_PATH);
    assert!(config.contains("mongodb://1.1.1.2:27017"));
    assert!(!config.contains("mongodb://1.1.1.1:27017"));
    assert!(config.contains("mongodb://2.2.2.2:27017"));

    let record = harness.reconciler.applied().record.as_ref().unwrap();
    assert_eq!(record.common_database.url, "mongodb://1.1.1.2:27017");
    assert_eq!(harness.reconciler.applied().writes, 2);
}

#[test]
fn upf_update_leaves_workload_alone() {
    let mut harness = Harness::active();

    harness.runtime_mut().set_remote_app_data(
        UPF_ID,
        upf(UPF_ID, "upf.sdcore.svc.cluster.local", 8806).remote_app_data,
    );
    let outcome = harness.pass();

    assert_eq!(outcome.phase, Phase::Active);
    assert_eq!(harness.workload().writes_to(CONFIG_PATH), 1);
    assert_eq!(harness.workload().restarts, 1);

    let record = harness.reconciler.applied().record.as_ref().unwrap();
    assert_eq!(record.upfs[0].port, 8806);
    assert_eq!(harness.reconciler.applied().writes, 2);
}

#[test]
fn failed_restart_is_retried() {
    let mut harness = Harness::active();
    harness
        .runtime_mut()
        .snapshot
        .config
        .insert("log-level".into(), serde_yaml::Value::String("debug".into()));
    harness.reconciler.workload_mut().failing_restarts = 1;

    let outcome = harness.pass();

    assert_eq!(outcome.phase, Phase::Error);
    assert_eq!(harness.workload().restarts, 2);
    assert_eq!(harness.workload().writes_to(CONFIG_PATH), 2);
    let record = harness.reconciler.applied().record.as_ref().unwrap();
    assert_eq!(record.log_level.to_string(), "info");

    let outcome = harness.pass();

    assert_eq!(outcome.phase, Phase::Active);
    assert_eq!(harness.workload().restarts, 3);
    assert_eq!(harness.workload().writes_to(CONFIG_PATH), 2);
    let record = harness.reconciler.applied().record.as_ref().unwrap();
    assert_eq!(record.log_level.to_string(), "debug");

    harness.pass();
    assert_eq!(harness.workload().restarts, 3);
}

#[test]
fn repeated_passes_are_idempotent() {
    let mut harness = Harness::active();
    let writes = harness.workload().writes.clone();
    let published = harness.runtime().published.len();

    for _ in 0..3 {
        let outcome = harness.pass();
        assert_eq!(outcome.phase, Phase::Active);
    }

    assert_eq!(harness.workload().writes, writes);
    assert_eq!(harness.workload().restarts, 1);
    assert_eq!(harness.workload().layers_added, 1);
    assert_eq!(harness.runtime().published.len(), published);
    assert_eq!(harness.reconciler.applied().writes, 1);
}

#[test]
fn failed_write_leaves_applied_untouched() {
    let mut harness = Harness::related();
    harness.pass();
    harness.issue_certificate(365);
    harness.reconciler.workload_mut().broken_path = Some(CONFIG_PATH.into());

    let outcome = harness.pass();

    assert_eq!(outcome.phase, Phase::Error);
    assert_eq!(outcome.status.kind, StatusKind::Maintenance);
    assert!(outcome
        .status
        .message
        .starts_with("Failed to configure workload"));
    assert_eq!(harness.reconciler.applied().record, None);
    assert_eq!(harness.reconciler.applied().writes, 0);
    assert_eq!(harness.workload().restarts, 0);

    harness.reconciler.workload_mut().broken_path = None;
    let outcome = harness.pass();

    assert_eq!(outcome.phase, Phase::Active);
    assert_eq!(harness.workload().writes_to(CONFIG_PATH), 1);
    assert_eq!(harness.workload().writes_to(CERTIFICATE_PATH), 1);
    assert_eq!(harness.workload().restarts, 1);
    assert!(harness.reconciler.applied().record.is_some());
}

#[test]
fn non_leader_does_nothing() {
    let mut runtime = FakeRuntime::new(false);
    for relation in databases() {
        runtime.relate(relation);
    }
    runtime.relate(certificates());
    let mut harness = Harness::new(FakeWorkload::ready(), runtime);

    let outcome = harness.pass();

    assert_eq!(outcome.phase, Phase::Blocked);
    assert_eq!(
        outcome.status,
        UnitStatus::blocked("Scaling is not implemented for this charm")
    );
    assert!(harness.runtime().published.is_empty());
    assert!(harness.workload().writes.is_empty());
    assert_eq!(harness.reconciler.applied().writes, 0);
}

#[test]
fn invalid_config_blocks() {
    let mut harness = Harness::related();
    harness.runtime_mut().snapshot.config.insert(
        "log-level".into(),
        serde_yaml::Value::String("verbose".into()),
    );

    let outcome = harness.pass();

    assert_eq!(
        outcome.status,
        UnitStatus::blocked("The following configurations are not valid: ['log-level']")
    );
    assert!(harness.workload().writes.is_empty());
}

#[test]
fn requests_published_while_blocked() {
    let mut runtime = FakeRuntime::new(true);
    runtime.relate(Relation::new(1, endpoint::COMMON_DATABASE, "mongodb_client"));
    runtime.relate(Relation::new(2, endpoint::AUTH_DATABASE, "mongodb_client"));
    runtime.relate(Relation::new(8, endpoint::INGRESS, "ingress"));
    let mut harness = Harness::new(FakeWorkload::ready(), runtime);

    let outcome = harness.pass();

    assert_eq!(outcome.phase, Phase::Blocked);
    assert_eq!(
        outcome.status,
        UnitStatus::waiting("Waiting for the common_database relation data to be available")
    );

    let common = &harness.runtime().relation(1).local_app_data;
    assert_eq!(common["database"], "free5gc");
    assert_eq!(common["extra-user-roles"], "admin");
    let auth = &harness.runtime().relation(2).local_app_data;
    assert_eq!(auth["database"], "authentication");

    let ingress = &harness.runtime().relation(8).local_app_data;
    assert_eq!(ingress["name"], format!("\"{}\"", APP));
    assert_eq!(ingress["model"], "\"sdcore\"");
    assert_eq!(ingress["port"], "5000");

    let published = harness.runtime().published.len();
    assert_eq!(published, 3);

    harness.pass();
    assert_eq!(harness.runtime().published.len(), published);
}

#[test]
fn too_many_ingress_relations_block() {
    let mut harness = Harness::related();
    harness
        .runtime_mut()
        .relate(Relation::new(8, endpoint::INGRESS, "ingress"));
    harness
        .runtime_mut()
        .relate(Relation::new(9, endpoint::INGRESS, "ingress"));

    let outcome = harness.pass();

    assert_eq!(outcome.phase, Phase::Blocked);
    assert_eq!(
        outcome.status,
        UnitStatus::blocked("Too many ingress relations: 2 (limit 1)")
    );
}

#[test]
fn ingress_url_is_the_webui_endpoint() {
    let mut harness = Harness::active();
    let url = IngressUrl {
        url: "https://nms.example.com/sdcore-sdcore-nms-k8s".into(),
    };
    harness.runtime_mut().relate(
        Relation::new(8, endpoint::INGRESS, "ingress").with_remote_app("traefik", url.encode()),
    );

    let outcome = harness.pass();

    assert_eq!(outcome.phase, Phase::Active);
    let environment = &harness.workload().plan.services[SERVICE].environment;
    assert_eq!(environment["WEBUI_ENDPOINT"], "nms.example.com");
    assert_eq!(harness.workload().layers_added, 2);
}

#[test]
fn certificates_removed_when_relation_broken() {
    let mut harness = Harness::active();
    harness.runtime_mut().unrelate(CERTIFICATES_ID);

    let outcome = harness.handle(relation_event(endpoint::CERTIFICATES, RelationHook::Broken));

    assert_eq!(outcome.phase, Phase::Blocked);
    assert_eq!(
        outcome.status,
        UnitStatus::blocked("Waiting for certificates relation to be created")
    );

    let files = &harness.workload().files;
    for path in &[PRIVATE_KEY_PATH, CSR_PATH, CERTIFICATE_PATH, CA_PATH] {
        assert!(!files.contains_key(*path), "{} still present", path);
    }
    assert!(files.contains_key(CONFIG_PATH));
}

#[test]
fn other_broken_relations_keep_certificates() {
    let mut harness = Harness::active();
    harness.runtime_mut().unrelate(UPF_ID);

    let outcome = harness.handle(relation_event(endpoint::FIVEG_N4, RelationHook::Broken));

    assert_eq!(outcome.phase, Phase::Active);
    assert!(harness.workload().files.contains_key(CERTIFICATE_PATH));
    let record = harness.reconciler.applied().record.as_ref().unwrap();
    assert!(record.upfs.is_empty());
}

#[test]
fn expiring_certificate_is_renewed_once() {
    let mut harness = Harness::related();
    harness.pass();
    let first_csr = harness.workload().file(CSR_PATH);
    harness.issue_certificate(3);

    let outcome = harness.pass();

    assert_eq!(
        outcome.status,
        UnitStatus::waiting("Waiting for certificates to be available")
    );
    let second_csr = harness.workload().file(CSR_PATH);
    assert_ne!(first_csr, second_csr);
    assert!(harness.published_csrs().contains(&second_csr));
    assert!(!harness.published_csrs().contains(&first_csr));

    harness.pass();
    assert_eq!(harness.workload().file(CSR_PATH), second_csr);
    assert_eq!(harness.workload().writes_to(CSR_PATH), 2);

    harness.issue_certificate(365);
    let outcome = harness.pass();
    assert_eq!(outcome.phase, Phase::Active);
    assert_eq!(harness.workload().writes_to(PRIVATE_KEY_PATH), 1);
}

#[test]
fn expiring_event_renews_certificate() {
    let mut harness = Harness::active();
    let csr = harness.workload().file(CSR_PATH);

    let outcome = harness.handle(EventKind::CertificateExpiring);

    assert_eq!(outcome.phase, Phase::WaitingOnWorkload);
    assert_ne!(harness.workload().file(CSR_PATH), csr);
    assert_eq!(harness.workload().writes_to(PRIVATE_KEY_PATH), 1);
}

#[test]
fn configuration_is_deterministic() {
    let mut relations = databases();
    relations.push(certificates());
    relations.push(upf(UPF_ID, "upf-b.sdcore.svc.cluster.local", 8805));
    relations.push(upf(6, "upf-a.sdcore.svc.cluster.local", 8805));
    relations.push(upf(7, "upf-a.sdcore.svc.cluster.local", 8806));

    let mut configs = vec![];
    for reverse in &[false, true] {
        let mut runtime = FakeRuntime::new(true);
        let mut ordered = relations.clone();
        if *reverse {
            ordered.reverse();
        }
        for relation in ordered {
            runtime.relate(relation);
        }

        let mut harness = Harness::new(FakeWorkload::ready(), runtime);
        harness.pass();
        harness.issue_certificate(365);
        assert_eq!(harness.pass().phase, Phase::Active);

        let record = harness.reconciler.applied().record.clone().unwrap();
        assert_eq!(
            record.upfs,
            vec![
                UpfEndpoint {
                    hostname: "upf-a.sdcore.svc.cluster.local".into(),
                    port: 8805,
                },
                UpfEndpoint {
                    hostname: "upf-b.sdcore.svc.cluster.local".into(),
                    port: 8805,
                },
            ]
        );
        configs.push(harness.workload().file(CONFIG_PATH));
    }

    assert_eq!(configs[0], configs[1]);
}

#[test]
fn webui_endpoint_published_to_sdcore_config() {
    let mut harness = Harness::active();
    harness
        .runtime_mut()
        .relate(Relation::new(10, endpoint::SDCORE_CONFIG, "sdcore_config").with_remote_app("amf", DataBag::new()));

    harness.pass();

    let data = &harness.runtime().relation(10).local_app_data;
    assert_eq!(data["webui_url"], format!("{}:9876", APP));
}

#[test]
fn nms_bootstrap() {
    let mut harness = Harness::related().with_nms(FakeNms::up());
    harness.pass();
    harness.issue_certificate(365);

    let outcome = harness.pass();
    assert_eq!(outcome.phase, Phase::Active);

    let nms = harness.reconciler.nms().unwrap();
    assert!(nms.initialized.get());
    assert_eq!(nms.users.borrow().len(), 1);
    assert_eq!(nms.logins.get(), 1);

    let secret = &harness.runtime().secrets[LOGIN_SECRET_LABEL];
    let (username, password) = nms.users.borrow()[0].clone();
    assert_eq!(secret["username"], username);
    assert_eq!(secret["password"], password);
    assert_eq!(secret["token"], "token-1");

    let outcome = harness.pass();
    assert_eq!(outcome.phase, Phase::Active);
    let nms = harness.reconciler.nms().unwrap();
    assert_eq!(nms.users.borrow().len(), 1);
    assert_eq!(nms.logins.get(), 1);
}

#[test]
fn nms_not_reachable() {
    let mut harness = Harness::related().with_nms(FakeNms::default());
    harness.pass();
    harness.issue_certificate(365);

    let outcome = harness.pass();

    assert_eq!(outcome.phase, Phase::Reconciling);
    assert_eq!(outcome.status, UnitStatus::waiting("NMS API not yet available"));
    assert!(harness.runtime().secrets.is_empty());
}

#[test]
fn gnb_configuration_published() {
    let mut nms = FakeNms::up();
    nms.slices.insert(
        "default".into(),
        NetworkSlice {
            mcc: "001".into(),
            mnc: "01".into(),
            sst: 1,
            sd: Some(0x102030),
            gnbs: vec![SliceGnb {
                name: "gnb01".into(),
                tac: 1,
            }],
        },
    );
    let mut harness = Harness::related().with_nms(nms);
    harness.runtime_mut().relate(
        Relation::new(11, endpoint::FIVEG_CORE_GNB, "fiveg_core_gnb")
            .with_remote_app("gnb", bag(vec![("gnb-name", "gnb01")])),
    );
    harness.runtime_mut().relate(
        Relation::new(12, endpoint::FIVEG_CORE_GNB, "fiveg_core_gnb")
            .with_remote_app("other-gnb", bag(vec![("gnb-name", "gnb02")])),
    );
    harness.pass();
    harness.issue_certificate(365);

    let outcome = harness.pass();
    assert_eq!(outcome.phase, Phase::Active);

    let published = GnbConfig::decode(&harness.runtime().relation(11).local_app_data).unwrap();
    assert_eq!(
        published,
        Decoded::Complete(GnbConfig {
            tac: 1,
            plmns: vec![PlmnConfig {
                mcc: "001".into(),
                mnc: "01".into(),
                sst: 1,
                sd: Some(0x102030),
            }],
        })
    );
    assert!(harness.runtime().relation(12).local_app_data.is_empty());

    let record = harness.reconciler.applied().record.as_ref().unwrap();
    assert_eq!(record.gnbs, vec!["gnb01".to_string(), "gnb02".to_string()]);
}

#[test]
fn inventory_follows_relations() {
    let nms = FakeNms::up();
    nms.gnbs.borrow_mut().insert("stale-gnb".into(), 4);
    nms.upfs
        .borrow_mut()
        .insert("stale-upf.sdcore.svc.cluster.local".into(), 8805);
    let mut harness = Harness::related().with_nms(nms);
    harness.runtime_mut().relate(
        Relation::new(11, endpoint::FIVEG_CORE_GNB, "fiveg_core_gnb")
            .with_remote_app("gnb", bag(vec![("gnb-name", "gnb01")])),
    );
    harness.pass();
    harness.issue_certificate(365);

    let outcome = harness.pass();
    assert_eq!(outcome.phase, Phase::Active);

    let nms = harness.reconciler.nms().unwrap();
    let gnbs: Vec<(String, u32)> = nms.gnbs.borrow().clone().into_iter().collect();
    assert_eq!(gnbs, vec![("gnb01".to_string(), DEFAULT_TAC)]);
    let upfs: Vec<(String, u16)> = nms.upfs.borrow().clone().into_iter().collect();
    assert_eq!(upfs, vec![("upf.sdcore.svc.cluster.local".to_string(), 8805)]);
    assert_eq!(nms.upf_updates.get(), 0);

    harness.runtime_mut().set_remote_app_data(
        UPF_ID,
        upf(UPF_ID, "upf.sdcore.svc.cluster.local", 8806).remote_app_data,
    );
    harness.pass();

    let nms = harness.reconciler.nms().unwrap();
    assert_eq!(nms.upfs.borrow()["upf.sdcore.svc.cluster.local"], 8806);
    assert_eq!(nms.upf_updates.get(), 1);

    harness.runtime_mut().unrelate(11);
    harness.runtime_mut().unrelate(UPF_ID);
    harness.handle(relation_event(endpoint::FIVEG_N4, RelationHook::Broken));

    let nms = harness.reconciler.nms().unwrap();
    assert!(nms.gnbs.borrow().is_empty());
    assert!(nms.upfs.borrow().is_empty());
}

#[test]
fn unreadable_private_key_is_replaced() {
    let mut workload = FakeWorkload::ready();
    workload
        .files
        .insert(PRIVATE_KEY_PATH.into(), b"not a key".to_vec());
    let mut harness = Harness::related();
    *harness.reconciler.workload_mut() = workload;

    let outcome = harness.pass();

    assert_eq!(
        outcome.status,
        UnitStatus::waiting("Waiting for certificates to be available")
    );
    let key = harness.workload().file(PRIVATE_KEY_PATH);
    assert_ne!(key, "not a key");
    assert!(tls::csr_matches_key(&harness.workload().file(CSR_PATH), &key).unwrap());

    harness.issue_certificate(365);
    assert_eq!(harness.pass().phase, Phase::Active);
    assert_eq!(harness.workload().writes_to(PRIVATE_KEY_PATH), 1);
}
