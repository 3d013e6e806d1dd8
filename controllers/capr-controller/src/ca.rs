//! CA bundle tracking.
//!
//! The serving CA lives in `kube-system/tls-capr-ca`. Its certificate is
//! copied into the `cacerts` setting, which feeds `/cacerts` and the CA
//! checksum handed to installer scripts.

use capr_settings::{CA_CERTS, Settings};
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use kube_runtime::watcher::Event;
use tracing::{debug, warn};

pub const CA_SECRET_NAMESPACE: &str = "kube-system";
pub const CA_SECRET_NAME: &str = "tls-capr-ca";
pub const CA_CERT_KEY: &str = "tls.crt";

/// Store the CA certificate from `secret` if it is the CA secret
pub fn apply_ca_secret(settings: &Settings, secret: &Secret) {
    if secret.name_any() != CA_SECRET_NAME || secret.namespace().as_deref() != Some(CA_SECRET_NAMESPACE) {
        return;
    }
    let Some(cert) = secret.data.as_ref().and_then(|d| d.get(CA_CERT_KEY)) else {
        debug!("CA secret has no {} key yet", CA_CERT_KEY);
        return;
    };
    match String::from_utf8(cert.0.clone()) {
        Ok(pem) => {
            debug!("Reconciling CA secret {}/{}", CA_SECRET_NAMESPACE, CA_SECRET_NAME);
            settings.set(CA_CERTS, pem);
        }
        Err(e) => warn!("CA secret {} is not valid UTF-8: {}", CA_CERT_KEY, e),
    }
}

/// Apply one watcher event. Deletions keep the last known bundle.
pub fn apply_ca_event(settings: &Settings, event: &Event<Secret>) {
    match event {
        Event::Apply(secret) | Event::InitApply(secret) => apply_ca_secret(settings, secret),
        Event::Delete(_) | Event::Init | Event::InitDone => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn secret(namespace: &str, name: &str, cert: Option<&[u8]>) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            data: cert.map(|c| BTreeMap::from([(CA_CERT_KEY.to_string(), ByteString(c.to_vec()))])),
            ..Default::default()
        }
    }

    #[test]
    fn test_ca_secret_sets_cacerts() {
        let settings = Settings::with_env(|_| None);
        let pem = "-----BEGIN CERTIFICATE-----\nabc\n-----END CERTIFICATE-----";
        apply_ca_event(
            &settings,
            &Event::Apply(secret(CA_SECRET_NAMESPACE, CA_SECRET_NAME, Some(pem.as_bytes()))),
        );
        assert_eq!(settings.get(CA_CERTS), pem);
        assert!(!settings.ca_checksum().is_empty());
    }

    #[test]
    fn test_other_secrets_ignored() {
        let settings = Settings::with_env(|_| None);
        apply_ca_secret(&settings, &secret("default", CA_SECRET_NAME, Some(b"nope")));
        apply_ca_secret(&settings, &secret(CA_SECRET_NAMESPACE, "tls-capr", Some(b"nope")));
        apply_ca_secret(&settings, &secret(CA_SECRET_NAMESPACE, CA_SECRET_NAME, None));
        assert_eq!(settings.get(CA_CERTS), "");
    }

    #[test]
    fn test_delete_keeps_bundle() {
        let settings = Settings::with_env(|_| None);
        let ca = secret(CA_SECRET_NAMESPACE, CA_SECRET_NAME, Some(b"pem"));
        apply_ca_event(&settings, &Event::InitApply(ca.clone()));
        apply_ca_event(&settings, &Event::Delete(ca));
        assert_eq!(settings.get(CA_CERTS), "pem");
    }
}
