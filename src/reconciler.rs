//! The control loop
//!
//! Every event leads to the same pass: read the snapshot, work out the desired configuration,
//! and bring the workload and our own relation data in line with it. Passes keep no state of
//! their own between invocations; what was applied is read back from the `AppliedStore`.
use tracing::{debug, info, warn};

use crate::aggregate::{aggregate, endpoint, DesiredConfig, IssuedCertificate, DATABASES};
use crate::applied::AppliedStore;
use crate::config::{CharmConfig, StaticConfig, TieBreak};
use crate::definition::CharmDefinition;
use crate::error::CharmError;
use crate::hook::EventKind;
use crate::interfaces::fiveg_core_gnb::GnbIdentity;
use crate::interfaces::ingress::IngressRequest;
use crate::interfaces::mongodb_client::DatabaseRequest;
use crate::interfaces::sdcore_config::WebuiEndpoint;
use crate::interfaces::tls_certificates::CertificateRequests;
use crate::interfaces::{Decoded, Payload};
use crate::model::{BagScope, DataBag, ModelSnapshot, Relation};
use crate::nms::{
    align_gnb_inventory, align_upf_inventory, gnb_configs, AdminAccount, NmsApi,
    LOGIN_SECRET_LABEL,
};
use crate::render::{self, CA_PATH, CERTIFICATE_PATH, CONFIG_PATH, SERVICE};
use crate::runtime::{Runtime, UnitStatus};
use crate::tls::{self, StoredMaterial, RENEWAL_WINDOW_DAYS};
use crate::workload::Workload;

/// Where a pass ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// A mandatory capability isn't ready, or the unit can't act
    Blocked,

    /// Relations are satisfied but the workload isn't ready for configuration
    WaitingOnWorkload,

    /// Configuration was applied and the workload is settling
    Reconciling,

    /// Applied matches desired and the workload is healthy
    Active,

    /// Applying failed; the next event retries
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub phase: Phase,
    pub status: UnitStatus,
}

impl Outcome {
    fn new(phase: Phase, status: UnitStatus) -> Self {
        Self { phase, status }
    }

    fn blocked<S: Into<String>>(message: S) -> Self {
        Self::new(Phase::Blocked, UnitStatus::blocked(message))
    }

    fn waiting_on_workload<S: Into<String>>(message: S) -> Self {
        Self::new(Phase::WaitingOnWorkload, UnitStatus::waiting(message))
    }

    fn settling<S: Into<String>>(message: S) -> Self {
        Self::new(Phase::Reconciling, UnitStatus::waiting(message))
    }

    fn error(err: &CharmError) -> Self {
        Self::new(
            Phase::Error,
            UnitStatus::maintenance(format!("Failed to configure workload: {}", err)),
        )
    }
}

/// How far the NMS itself has come up
#[derive(Debug, Clone, PartialEq, Eq)]
enum NmsState {
    /// No API client was configured
    Unmanaged,
    Unavailable,
    Uninitialized,
    Ready { token: Option<String> },
}

/// Returns true if every key of `wanted` already has the same value in `bag`
fn contains_all(bag: &DataBag, wanted: &DataBag) -> bool {
    wanted.iter().all(|(k, v)| bag.get(k) == Some(v))
}

fn same_pem(a: &str, b: &str) -> bool {
    a.trim() == b.trim()
}

pub struct Reconciler<W, R, A, N> {
    definition: CharmDefinition,
    workload: W,
    runtime: R,
    applied: A,
    nms: Option<N>,
    tie_break: TieBreak,
}

impl<W, R, A, N> Reconciler<W, R, A, N>
where
    W: Workload,
    R: Runtime,
    A: AppliedStore,
    N: NmsApi,
{
    pub fn new(definition: CharmDefinition, workload: W, runtime: R, applied: A) -> Self {
        Self {
            definition,
            workload,
            runtime,
            applied,
            nms: None,
            tie_break: TieBreak::default(),
        }
    }

    pub fn with_nms(mut self, nms: N) -> Self {
        self.nms = Some(nms);
        self
    }

    pub fn with_tie_break(mut self, tie_break: TieBreak) -> Self {
        self.tie_break = tie_break;
        self
    }

    pub fn workload(&self) -> &W {
        &self.workload
    }

    pub fn workload_mut(&mut self) -> &mut W {
        &mut self.workload
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut R {
        &mut self.runtime
    }

    pub fn applied(&self) -> &A {
        &self.applied
    }

    pub fn nms(&self) -> Option<&N> {
        self.nms.as_ref()
    }

    /// Runs one pass for `event` and reports the result as the unit status
    pub fn handle_event(&mut self, event: &EventKind, snapshot: &ModelSnapshot) -> Outcome {
        info!(event = %event, unit = %snapshot.unit.unit_name, "Handling event");

        let outcome = self.reconcile(event, snapshot);

        info!(phase = ?outcome.phase, status = %outcome.status, "Pass finished");
        if let Err(err) = self.runtime.set_status(&outcome.status) {
            warn!(error = %err, "Failed to set unit status");
        }

        outcome
    }

    fn reconcile(&mut self, event: &EventKind, snapshot: &ModelSnapshot) -> Outcome {
        if !snapshot.unit.is_leader {
            return Outcome::blocked("Scaling is not implemented for this charm");
        }

        let defaults = self
            .definition
            .config
            .as_ref()
            .map(|c| c.defaults())
            .unwrap_or_default();
        let config = match CharmConfig::from_options(&snapshot.config, &defaults) {
            Ok(config) => config,
            Err(CharmError::InvalidConfig(names)) => {
                let names: Vec<String> = names.iter().map(|n| format!("'{}'", n)).collect();
                return Outcome::blocked(format!(
                    "The following configurations are not valid: [{}]",
                    names.join(", ")
                ));
            }
            Err(err) => return Outcome::blocked(err.to_string()),
        };

        if event.is_broken(endpoint::CERTIFICATES) {
            self.remove_certificates();
        }

        self.publish_requests(snapshot);

        let static_config =
            StaticConfig::new(&config, &snapshot.unit).with_tie_break(self.tie_break);
        let aggregation = aggregate(&snapshot.relations, &self.definition, &static_config);

        for diagnostic in &aggregation.diagnostics {
            warn!(
                endpoint = diagnostic.endpoint,
                relation = %diagnostic.relation,
                reason = %diagnostic.reason,
                "Ignoring relation data"
            );
        }

        let desired = match aggregation.desired {
            Some(desired) => desired,
            None => {
                return match aggregation.report.first_blocker() {
                    Some(capability) => {
                        if let Some(err) = capability.error() {
                            info!(error = %err, "Not ready");
                        }
                        let status = capability.status();
                        Outcome::new(Phase::Blocked, status)
                    }
                    None => Outcome::blocked("Waiting for relations"),
                };
            }
        };

        if !self.workload.can_connect() {
            return Outcome::waiting_on_workload("Waiting for container to be ready");
        }
        if !self.workload.storage_attached() {
            return Outcome::waiting_on_workload("Waiting for storage to be attached");
        }

        match self.certificates(event, snapshot, &desired) {
            Ok(None) => {}
            Ok(Some(wait)) => return Outcome::waiting_on_workload(wait),
            Err(err) => {
                warn!(error = %err, "Failed to handle certificates");
                return Outcome::error(&err);
            }
        }

        if let Err(err) = self.apply(&desired) {
            warn!(error = %err, "Failed to configure workload");
            return Outcome::error(&err);
        }

        self.publish(snapshot, &desired)
    }

    /// Removes certificate material once the certificates relation is gone
    fn remove_certificates(&mut self) {
        if !self.workload.can_connect() {
            debug!("Container not reachable, leaving certificates in place");
            return;
        }
        if let Err(err) = StoredMaterial::clean_up(&mut self.workload) {
            warn!(error = %err, "Failed to remove certificates");
        }
    }

    /// Writes `data` into our bag on `relation`, unless it is already there
    fn publish_if_changed(&mut self, relation: &Relation, scope: BagScope, data: &DataBag) {
        if contains_all(relation.local_data(scope), data) {
            return;
        }

        match self.runtime.publish(relation.id, scope, data) {
            Ok(()) => info!(
                endpoint = %relation.endpoint,
                relation = %relation.id,
                "Published relation data"
            ),
            Err(err) => warn!(
                endpoint = %relation.endpoint,
                relation = %relation.id,
                error = %err,
                "Failed to publish relation data"
            ),
        }
    }

    /// Publishes what providers need from us before they can publish anything back
    ///
    /// This runs while other capabilities are still missing; without it, a database provider
    /// would wait on us as long as we wait on it.
    fn publish_requests(&mut self, snapshot: &ModelSnapshot) {
        for &(ep, database) in DATABASES.iter() {
            let request = DatabaseRequest::admin(database).encode();
            for relation in snapshot.relations.for_endpoint(ep) {
                self.publish_if_changed(relation, BagScope::App, &request);
            }
        }

        let unit = &snapshot.unit;
        let request = IngressRequest::nms(unit.model_name.as_str(), unit.app_name.as_str()).encode();
        for relation in snapshot.relations.for_endpoint(endpoint::INGRESS) {
            self.publish_if_changed(relation, BagScope::App, &request);
        }
    }

    /// Makes sure a key and CSR exist and the CSR is published
    ///
    /// Returns a status message while the signed certificate isn't usable yet.
    fn certificates(
        &mut self,
        event: &EventKind,
        snapshot: &ModelSnapshot,
        desired: &DesiredConfig,
    ) -> Result<Option<String>, CharmError> {
        let relation = match snapshot.relations.for_endpoint(endpoint::CERTIFICATES).next() {
            Some(relation) => relation,
            None => return Ok(Some("Waiting for certificates to be available".into())),
        };

        let stored = StoredMaterial::load(&self.workload)?;
        let renew = self.renewal_due(event, &stored, desired.certificate.as_ref())?;

        let fqdn = snapshot.unit.fqdn.as_str();
        let (key, csr) = tls::ensure_key_and_csr(&mut self.workload, &stored, &[fqdn], renew)?;

        let published = CertificateRequests::decode(&relation.local_unit_data)
            .ok()
            .and_then(Decoded::complete)
            .unwrap_or_default();
        if published.requests.len() != 1 || !published.contains(&csr) {
            let requests = CertificateRequests::single(csr.as_str()).encode();
            self.runtime.publish(relation.id, BagScope::Unit, &requests)?;
            info!(relation = %relation.id, "Published certificate signing request");
        }

        let issued = match &desired.certificate {
            Some(issued) if same_pem(&issued.csr, &csr) => issued,
            _ => return Ok(Some("Waiting for certificates to be available".into())),
        };

        if !tls::certificate_matches_key(&issued.certificate, &key)? {
            warn!("Issued certificate doesn't match the private key");
            return Ok(Some("Waiting for certificates to be available".into()));
        }

        Ok(None)
    }

    /// Renewal is due when the stored certificate is close to expiry, or the provider said so
    ///
    /// Only the certificate issued for the CSR on disk is renewed, so a pending renewal isn't
    /// repeated.
    fn renewal_due(
        &self,
        event: &EventKind,
        stored: &StoredMaterial,
        issued: Option<&IssuedCertificate>,
    ) -> Result<bool, CharmError> {
        let issued = match (issued, &stored.csr) {
            (Some(issued), Some(csr)) if same_pem(&issued.csr, csr) => issued,
            _ => return Ok(false),
        };

        if *event == EventKind::CertificateExpiring {
            info!("Certificate expiring, renewing");
            return Ok(true);
        }

        let certificate = stored.certificate.as_deref().unwrap_or(&issued.certificate);
        let expiring = tls::expires_within(certificate, RENEWAL_WINDOW_DAYS)?;
        if expiring {
            info!(days = RENEWAL_WINDOW_DAYS, "Certificate within renewal window, renewing");
        }
        Ok(expiring)
    }

    /// Writes `content` to `path` unless it is already there; returns true if written
    fn push_if_changed(&mut self, path: &str, content: &[u8]) -> Result<bool, CharmError> {
        if self.workload.pull(path)?.as_deref() == Some(content) {
            return Ok(false);
        }
        self.workload.push(path, content)?;
        info!(path, "Updated workload file");
        Ok(true)
    }

    /// Brings workload files and the Pebble plan in line with `desired`
    ///
    /// The applied record is only updated after every write succeeded. The service is restarted
    /// whenever a file changed in this pass, or the record shows the last pass stopped short of
    /// restarting it.
    fn apply(&mut self, desired: &DesiredConfig) -> Result<(), CharmError> {
        let applied = match self.applied.load() {
            Ok(applied) => applied,
            Err(err) => {
                warn!(error = %err, "Couldn't read applied configuration, rewriting it");
                None
            }
        };

        let config_file = render::config_file(desired)?;
        let restart_pending = match &applied {
            Some(applied) => {
                applied.certificate != desired.certificate
                    || render::config_file(applied)? != config_file
            }
            None => true,
        };
        if restart_pending {
            debug!("Applied configuration predates the desired workload files");
        }

        let mut changed = false;
        if let Some(issued) = &desired.certificate {
            changed |= self.push_if_changed(CERTIFICATE_PATH, issued.certificate.as_bytes())?;
            changed |= self.push_if_changed(CA_PATH, issued.ca.as_bytes())?;
        }
        changed |= self.push_if_changed(CONFIG_PATH, config_file.as_bytes())?;

        let layer = render::layer(desired);
        let plan = self.workload.plan()?;
        if !layer.is_applied_in(&plan) {
            self.workload.add_layer(render::CONTAINER, &layer)?;
            info!(container = render::CONTAINER, "Pebble layer updated");
        }

        if changed || restart_pending {
            self.workload.restart(SERVICE)?;
            info!(service = SERVICE, "Service restarted");
        }

        if applied.as_ref() != Some(desired) {
            self.applied.store(desired)?;
            info!("Recorded applied configuration");
        }

        Ok(())
    }

    /// Publishes data that depends on a running NMS and reports how far it has come up
    fn publish(&mut self, snapshot: &ModelSnapshot, desired: &DesiredConfig) -> Outcome {
        let running = match self.workload.is_running(SERVICE) {
            Ok(running) => running,
            Err(err) => {
                warn!(error = %err, "Couldn't query service state");
                false
            }
        };
        if !running {
            return Outcome::settling("Waiting for NMS service to start");
        }

        let webui = WebuiEndpoint::for_app(&snapshot.unit.app_name).encode();
        for relation in snapshot.relations.for_endpoint(endpoint::SDCORE_CONFIG) {
            self.publish_if_changed(relation, BagScope::App, &webui);
        }

        match self.bootstrap_nms() {
            NmsState::Unmanaged => Outcome::new(Phase::Active, UnitStatus::active()),
            NmsState::Unavailable => Outcome::settling("NMS API not yet available"),
            NmsState::Uninitialized => Outcome::settling("NMS not yet initialized"),
            NmsState::Ready { token } => {
                if let Some(token) = token {
                    self.sync_inventory(desired, &token);
                    self.sync_gnbs(snapshot, &token);
                }
                Outcome::new(Phase::Active, UnitStatus::active())
            }
        }
    }

    /// Makes sure the admin account exists and holds a valid session token
    fn bootstrap_nms(&mut self) -> NmsState {
        let nms = match &self.nms {
            Some(nms) => nms,
            None => return NmsState::Unmanaged,
        };

        let status = match nms.status() {
            Ok(status) => status,
            Err(err) => {
                debug!(error = %err, "NMS API not reachable");
                return NmsState::Unavailable;
            }
        };

        let existing = match self.runtime.get_secret(LOGIN_SECRET_LABEL) {
            Ok(content) => content.as_ref().and_then(AdminAccount::from_secret),
            Err(err) => {
                warn!(error = %err, "Couldn't read admin credentials");
                return NmsState::Uninitialized;
            }
        };

        let mut account = match existing {
            Some(account) => account,
            None => {
                let account = AdminAccount::generate();
                if let Err(err) = self.runtime.set_secret(LOGIN_SECRET_LABEL, &account.to_secret()) {
                    warn!(error = %err, "Couldn't store admin credentials");
                    return NmsState::Uninitialized;
                }
                info!(username = %account.username, "Admin account details saved");
                account
            }
        };

        if !status.initialized {
            if let Err(err) = nms.create_first_user(&account.username, &account.password) {
                warn!(error = %err, "Couldn't create the first NMS user");
                return NmsState::Uninitialized;
            }
            info!(username = %account.username, "Created first NMS user");
        }

        let token_valid = account
            .token
            .as_deref()
            .map(|t| nms.token_is_valid(t))
            .unwrap_or(false);
        if token_valid {
            return NmsState::Ready {
                token: account.token,
            };
        }

        match nms.login(&account.username, &account.password) {
            Ok(Some(token)) => {
                account.token = Some(token);
                if let Err(err) = self.runtime.set_secret(LOGIN_SECRET_LABEL, &account.to_secret()) {
                    warn!(error = %err, "Couldn't store the NMS session token");
                }
            }
            Ok(None) => warn!(
                "Failed to login with the stored admin credentials. If the admin account was \
                 changed manually, update the `{}` secret accordingly",
                LOGIN_SECRET_LABEL
            ),
            Err(err) => warn!(error = %err, "NMS login failed"),
        }

        NmsState::Ready {
            token: account.token,
        }
    }

    /// Registers related gNBs and UPFs in the NMS inventory and drops the ones no longer related
    fn sync_inventory(&self, desired: &DesiredConfig, token: &str) {
        let nms = match &self.nms {
            Some(nms) => nms,
            None => return,
        };

        if let Err(err) = align_gnb_inventory(nms, &desired.gnbs, token) {
            warn!(error = %err, "Couldn't synchronize the gNB inventory");
        }
        if let Err(err) = align_upf_inventory(nms, &desired.upfs, token) {
            warn!(error = %err, "Couldn't synchronize the UPF inventory");
        }
    }

    /// Publishes the network configuration of each related gNB, as found in the NMS
    fn sync_gnbs(&mut self, snapshot: &ModelSnapshot, token: &str) {
        let mut relations = snapshot
            .relations
            .for_endpoint(endpoint::FIVEG_CORE_GNB)
            .peekable();
        if relations.peek().is_none() {
            return;
        }

        let nms = match &self.nms {
            Some(nms) => nms,
            None => return,
        };

        let slices = nms.list_network_slices(token).and_then(|names| {
            names
                .iter()
                .map(|name| nms.get_network_slice(name, token))
                .collect::<Result<Vec<_>, _>>()
        });
        let configs = match slices {
            Ok(slices) => gnb_configs(&slices),
            Err(err) => {
                warn!(error = %err, "Couldn't read network slices");
                return;
            }
        };

        for relation in relations {
            let gnb = match GnbIdentity::decode(&relation.remote_app_data) {
                Ok(Decoded::Complete(gnb)) => gnb,
                _ => continue,
            };

            let config = match configs.get(&gnb.name) {
                Some(config) => config,
                None => {
                    debug!(gnb = %gnb.name, "gNB is not part of any network slice");
                    continue;
                }
            };

            if let Err(reason) = config.validate() {
                warn!(gnb = %gnb.name, %reason, "Not publishing invalid gNB configuration");
                continue;
            }

            self.publish_if_changed(relation, BagScope::App, &config.encode());
        }
    }
}
