/// Integration tests for tenant provisioning and host resolution
///
/// These tests require a running PostgreSQL database and are skipped when
/// DATABASE_URL is not set. Secrets go to the in-memory store.

mod common;

use std::sync::Arc;

use clinicore_shared::auth::accounts::{AccountError, AccountStore, NewAccount, PgAccountStore};
use clinicore_shared::auth::password::verify_password;
use clinicore_shared::models::role::{default_role_names, Role};
use clinicore_shared::models::tenant::{ProvisioningStatus, Tenant};
use clinicore_shared::models::user::TenantUser;
use clinicore_shared::secrets::{MemorySecretStore, SecretStore, SecretStoreError};
use clinicore_shared::tenancy::provisioning::ProvisionRequest;
use clinicore_shared::tenancy::{
    DirectoryConfig, DirectoryError, PgTenantStore, ProvisioningError, ProvisioningStage,
    Resolution, SchemaContext, SchemaName, TenantDirectory, TenantProvisioner,
};

fn request(subdomain: &str) -> ProvisionRequest {
    ProvisionRequest {
        name: format!("Clinic {subdomain}"),
        subdomain: Some(subdomain.to_string()),
        custom_domain: None,
        plan_id: None,
        admin_email: format!("admin@{subdomain}.example.com"),
    }
}

#[tokio::test]
async fn test_provision_builds_schema_and_secrets() {
    let Some(router) = common::test_router(4).await else { return };
    let secrets = Arc::new(MemorySecretStore::new());
    let provisioner = TenantProvisioner::new(router.clone(), secrets.clone());

    let subdomain = common::unique_subdomain("clinic");
    let provisioned = provisioner.provision(request(&subdomain)).await.unwrap();
    let tenant_id = provisioned.tenant.id;

    assert!(provisioned.tenant.is_active);
    assert_eq!(provisioned.tenant.status(), Some(ProvisioningStatus::Complete));
    assert_eq!(provisioned.schema(), SchemaName::for_tenant(tenant_id));
    assert_eq!(provisioned.registration.transit_key, format!("{tenant_id}-transit"));

    let mut conn = router.acquire_for(provisioned.schema()).await.unwrap();
    let names: Vec<String> = Role::list(&mut conn)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(names, default_role_names());

    let admin = TenantUser::find_by_email(&mut conn, &provisioned.admin.email)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(admin.tenant_id, tenant_id);
    assert!(verify_password(&provisioned.initial_password, &admin.password_hash).unwrap());

    for role in default_role_names() {
        assert!(secrets.get_token(tenant_id, role).await.is_ok(), "{role}");
    }
    assert!(matches!(
        secrets.get_token(tenant_id, "receptionist").await,
        Err(SecretStoreError::TokenNotFound { .. })
    ));
}

#[tokio::test]
async fn test_provisioned_tenant_resolves_by_host() {
    let Some(router) = common::test_router(4).await else { return };
    let provisioner = TenantProvisioner::new(router.clone(), Arc::new(MemorySecretStore::new()));
    let directory = TenantDirectory::new(
        Arc::new(PgTenantStore::new(router.clone())),
        DirectoryConfig::new("clinicore.test"),
    );

    let subdomain = common::unique_subdomain("resolve");
    let provisioned = provisioner.provision(request(&subdomain)).await.unwrap();
    let host = format!("{}.clinicore.test", subdomain.to_uppercase());

    match directory.resolve(&host).await.unwrap() {
        Resolution::Tenant(tenant) => assert_eq!(tenant.id, provisioned.tenant.id),
        Resolution::Public => panic!("{host} resolved to public"),
    }

    directory.deactivate(provisioned.tenant.id).await.unwrap();
    assert!(matches!(
        directory.resolve(&host).await,
        Err(DirectoryError::TenantNotFound { .. })
    ));
}

#[tokio::test]
async fn test_tenants_are_isolated() {
    let Some(router) = common::test_router(4).await else { return };
    let provisioner = TenantProvisioner::new(router.clone(), Arc::new(MemorySecretStore::new()));

    let a = provisioner
        .provision(request(&common::unique_subdomain("iso")))
        .await
        .unwrap();
    let b = provisioner
        .provision(request(&common::unique_subdomain("iso")))
        .await
        .unwrap();

    let mut conn_a = router.acquire_for(a.schema()).await.unwrap();
    sqlx::query("INSERT INTO patients (full_name) VALUES ('Jane Roe')")
        .execute(&mut *conn_a)
        .await
        .unwrap();
    drop(conn_a);

    let mut conn_b = router.acquire_for(b.schema()).await.unwrap();
    let visible: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM patients")
        .fetch_one(&mut *conn_b)
        .await
        .unwrap();
    assert_eq!(visible, 0);
}

#[tokio::test]
async fn test_duplicate_subdomain_is_conflict() {
    let Some(router) = common::test_router(4).await else { return };
    let provisioner = TenantProvisioner::new(router.clone(), Arc::new(MemorySecretStore::new()));

    let subdomain = common::unique_subdomain("dup");
    provisioner.provision(request(&subdomain)).await.unwrap();

    assert!(matches!(
        provisioner.provision(request(&subdomain)).await,
        Err(ProvisioningError::Conflict(_))
    ));
}

#[tokio::test]
async fn test_secret_store_outage_marks_tenant_failed() {
    let Some(router) = common::test_router(4).await else { return };
    let secrets = Arc::new(MemorySecretStore::new());
    secrets.set_unavailable(true);
    let provisioner = TenantProvisioner::new(router.clone(), secrets);

    let err = provisioner
        .provision(request(&common::unique_subdomain("outage")))
        .await
        .unwrap_err();

    let tenant_id = match err {
        ProvisioningError::PartialFailure { tenant_id, stage, .. } => {
            assert_eq!(stage, ProvisioningStage::SecretStore);
            tenant_id
        }
        other => panic!("expected PartialFailure, got {other:?}"),
    };

    let mut conn = router.acquire_public().await.unwrap();
    let tenant = Tenant::find_by_id(&mut conn, tenant_id).await.unwrap().unwrap();
    assert!(!tenant.is_active);
    assert_eq!(tenant.status(), Some(ProvisioningStatus::Failed));

    // A failed tenant cannot be switched on.
    assert!(Tenant::set_active(&mut conn, tenant_id, true).await.unwrap().is_none());
}

#[tokio::test]
async fn test_accounts_follow_the_request_schema() {
    let Some(router) = common::test_router(4).await else { return };
    let provisioner = TenantProvisioner::new(router.clone(), Arc::new(MemorySecretStore::new()));
    let accounts = PgAccountStore::new(router.clone());

    let provisioned = provisioner
        .provision(request(&common::unique_subdomain("accounts")))
        .await
        .unwrap();
    let schema = provisioned.schema();
    let admin_email = provisioned.admin.email.clone();

    let patient = |email: &str| NewAccount {
        email: email.to_string(),
        password_hash: "$argon2id$v=19$stub".to_string(),
        role: "patient".to_string(),
    };

    SchemaContext::scope(schema, async {
        let admin = accounts.find_by_email(&admin_email.to_uppercase()).await.unwrap().unwrap();
        assert_eq!(admin.role, "clinic_admin");
        assert_eq!(accounts.find_by_id(admin.id).await.unwrap(), Some(admin));

        let created = accounts.create(patient("Pat@Example.com")).await.unwrap();
        assert_eq!(created.role, "patient");
        assert_eq!(created.email, "pat@example.com");

        assert!(matches!(
            accounts.create(patient("pat@example.com")).await,
            Err(AccountError::EmailTaken)
        ));
        assert!(matches!(
            accounts
                .create(NewAccount { role: "receptionist".to_string(), ..patient("r@example.com") })
                .await,
            Err(AccountError::UnknownRole(_))
        ));
    })
    .await;

    // The clinic admin is not a platform account
    let operator_email = format!("ops-{}@example.com", rand::random::<u32>());
    SchemaContext::scope(SchemaName::Public, async {
        assert!(accounts.find_by_email(&admin_email).await.unwrap().is_none());

        let operator = accounts
            .create(NewAccount {
                role: "super_admin".to_string(),
                ..patient(&operator_email)
            })
            .await
            .unwrap();
        assert_eq!(accounts.find_by_id(operator.id).await.unwrap(), Some(operator));
    })
    .await;
}
