use anyhow::Result;
use k8s_openapi::api::coordination::v1 as coordv1;
use kube::api::{Api, ObjectMeta, Patch, PatchParams};
use std::sync::Arc;
use tokio::{sync::watch, time};

const LEASE_DURATION: time::Duration = time::Duration::from_secs(30);
const RENEW_GRACE_PERIOD: time::Duration = time::Duration::from_secs(1);

/// Creates the write Lease if needed and starts competing for it.
pub async fn init<T>(
    runtime: &kubert::Runtime<T>,
    ns: &str,
    lease_name: &str,
    field_manager: &str,
    hostname: &str,
) -> Result<watch::Receiver<Arc<kubert::lease::Claim>>> {
    let lease = coordv1::Lease {
        metadata: ObjectMeta {
            name: Some(lease_name.to_string()),
            namespace: Some(ns.to_string()),
            // Specifying a resource version of "0" means that we will
            // only create the Lease if it does not already exist.
            resource_version: Some("0".to_string()),
            labels: Some(
                [(
                    "app.kubernetes.io/component".to_string(),
                    field_manager.to_string(),
                )]
                .into_iter()
                .collect(),
            ),
            ..Default::default()
        },
        spec: None,
    };
    let api = Api::<coordv1::Lease>::namespaced(runtime.client(), ns);
    match api
        .patch(
            lease_name,
            &PatchParams {
                field_manager: Some(field_manager.to_string()),
                ..Default::default()
            },
            &Patch::Apply(lease),
        )
        .await
    {
        Ok(lease) => tracing::info!(?lease, "Created Lease resource"),
        Err(kube::Error::Api(_)) => tracing::debug!("Lease already exists, no need to create it"),
        Err(error) => {
            return Err(error.into());
        }
    };

    let params = kubert::lease::ClaimParams {
        lease_duration: LEASE_DURATION,
        renew_grace_period: RENEW_GRACE_PERIOD,
    };
    let (claims, _task) = kubert::lease::LeaseManager::init(api, lease_name)
        .await?
        .spawn(hostname, params)
        .await?;
    Ok(claims)
}

/// Waits until `hostname` holds the lease. Returns false if the lease manager stops first.
pub async fn acquired(
    claims: &mut watch::Receiver<Arc<kubert::lease::Claim>>,
    hostname: &str,
) -> bool {
    loop {
        let held = claims.borrow_and_update().is_current_for(hostname);
        if held {
            return true;
        }
        if claims.changed().await.is_err() {
            return false;
        }
    }
}

/// Waits until `hostname` no longer holds the lease. Returns false if the lease manager stops
/// first, in which case the claim cannot be renewed or reacquired.
pub async fn lost(
    claims: &mut watch::Receiver<Arc<kubert::lease::Claim>>,
    hostname: &str,
) -> bool {
    loop {
        if claims.changed().await.is_err() {
            return false;
        }
        if !claims.borrow_and_update().is_current_for(hostname) {
            return true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claim(holder: &str) -> Arc<kubert::lease::Claim> {
        Arc::new(kubert::lease::Claim {
            holder: holder.to_string(),
            expiry: chrono::DateTime::<chrono::Utc>::MAX_UTC,
        })
    }

    #[tokio::test]
    async fn claim_is_held_until_another_replica_takes_it() {
        let (tx, mut rx) = watch::channel(claim("other"));
        let waiting = tokio::spawn(async move {
            let held = acquired(&mut rx, "me").await;
            (held, rx)
        });
        tx.send(claim("me")).expect("receiver alive");
        let (held, mut rx) = waiting.await.expect("task completes");
        assert!(held);

        // Renewals by the holder do not end the claim.
        tx.send(claim("me")).expect("receiver alive");
        let renewed = time::timeout(time::Duration::from_millis(20), lost(&mut rx, "me")).await;
        assert!(renewed.is_err());

        tx.send(claim("other")).expect("receiver alive");
        let ended = time::timeout(time::Duration::from_secs(1), lost(&mut rx, "me"))
            .await
            .expect("claim lost");
        assert!(ended);
    }

    #[tokio::test]
    async fn stopped_manager_ends_the_claim() {
        let (tx, mut rx) = watch::channel(claim("me"));
        assert!(acquired(&mut rx, "me").await);
        drop(tx);
        let ended = time::timeout(time::Duration::from_secs(1), lost(&mut rx, "me"))
            .await
            .expect("claim ends with the manager");
        assert!(!ended);
    }
}
