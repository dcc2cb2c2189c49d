use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! define_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

define_id!(TenantId);
define_id!(ProductId);

/// Isolation axis under which pools are kept separate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentEnvironment {
    Development,
    Staging,
    Production,
}

impl DeploymentEnvironment {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentEnvironment::Development => "development",
            DeploymentEnvironment::Staging => "staging",
            DeploymentEnvironment::Production => "production",
        }
    }
}

impl fmt::Display for DeploymentEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentEnvironment {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(DeploymentEnvironment::Development),
            "staging" => Ok(DeploymentEnvironment::Staging),
            "production" | "prod" => Ok(DeploymentEnvironment::Production),
            _ => Err(ParseKindError(s.to_string())),
        }
    }
}

/// Kinds of general-purpose identifiers handed out by the unique identifier service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdentifierType {
    Quote,
    Customer,
    Organisation,
    Generic,
}

impl IdentifierType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierType::Quote => "quote",
            IdentifierType::Customer => "customer",
            IdentifierType::Organisation => "organisation",
            IdentifierType::Generic => "generic",
        }
    }
}

/// Which pool a number belongs to. Kinds share one allocation algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NumberKind {
    Policy,
    Invoice,
    Claim,
    CreditNote,
    Identifier(IdentifierType),
}

impl NumberKind {
    /// Reference-number kinds, i.e. everything except unique identifiers.
    pub const REFERENCE_KINDS: [NumberKind; 4] = [
        NumberKind::Policy,
        NumberKind::Invoice,
        NumberKind::Claim,
        NumberKind::CreditNote,
    ];

    /// Stable name used in storage keys, metrics labels and error context.
    pub fn pool_name(&self) -> String {
        match self {
            NumberKind::Policy => "policy".to_string(),
            NumberKind::Invoice => "invoice".to_string(),
            NumberKind::Claim => "claim".to_string(),
            NumberKind::CreditNote => "credit-note".to_string(),
            NumberKind::Identifier(kind) => format!("identifier:{}", kind.as_str()),
        }
    }
}

impl fmt::Display for NumberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pool_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognised value: {0}")]
pub struct ParseKindError(pub String);

impl FromStr for NumberKind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.to_ascii_lowercase();
        if let Some(identifier) = lowered.strip_prefix("identifier:") {
            let kind = match identifier {
                "quote" => IdentifierType::Quote,
                "customer" => IdentifierType::Customer,
                "organisation" => IdentifierType::Organisation,
                "generic" => IdentifierType::Generic,
                _ => return Err(ParseKindError(s.to_string())),
            };
            return Ok(NumberKind::Identifier(kind));
        }
        match lowered.as_str() {
            "policy" => Ok(NumberKind::Policy),
            "invoice" => Ok(NumberKind::Invoice),
            "claim" => Ok(NumberKind::Claim),
            "credit-note" | "creditnote" => Ok(NumberKind::CreditNote),
            _ => Err(ParseKindError(s.to_string())),
        }
    }
}

/// The tenant, product and environment a business transaction runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductContext {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub environment: DeploymentEnvironment,
}

impl ProductContext {
    pub fn new(tenant_id: TenantId, product_id: ProductId, environment: DeploymentEnvironment) -> Self {
        ProductContext {
            tenant_id,
            product_id,
            environment,
        }
    }

    pub fn partition(&self, kind: NumberKind) -> PartitionKey {
        PartitionKey::new(self.tenant_id, self.product_id, self.environment, kind)
    }
}

/// Identifies exactly one logical pool. Every record belongs to one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionKey {
    tenant_id: TenantId,
    product_id: ProductId,
    environment: DeploymentEnvironment,
    kind: NumberKind,
}

impl PartitionKey {
    pub fn new(
        tenant_id: TenantId,
        product_id: ProductId,
        environment: DeploymentEnvironment,
        kind: NumberKind,
    ) -> Self {
        PartitionKey {
            tenant_id,
            product_id,
            environment,
            kind,
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn environment(&self) -> DeploymentEnvironment {
        self.environment
    }

    pub fn kind(&self) -> NumberKind {
        self.kind
    }

    pub fn context(&self) -> ProductContext {
        ProductContext::new(self.tenant_id, self.product_id, self.environment)
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.tenant_id, self.product_id, self.environment, self.kind
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_partition_keys_differ_by_every_dimension() {
        let context = ProductContext::new(TenantId::new(), ProductId::new(), DeploymentEnvironment::Staging);
        let policy = context.partition(NumberKind::Policy);
        let invoice = context.partition(NumberKind::Invoice);
        let production = ProductContext {
            environment: DeploymentEnvironment::Production,
            ..context
        }
        .partition(NumberKind::Policy);

        let keys: HashSet<PartitionKey> = [policy, invoice, production, policy].into_iter().collect();
        assert_eq!(keys.len(), 3);
        assert_eq!(policy.context(), context);
    }

    #[test]
    fn test_number_kind_parses_its_pool_name() {
        let kinds = [
            NumberKind::Policy,
            NumberKind::CreditNote,
            NumberKind::Identifier(IdentifierType::Customer),
        ];
        for kind in kinds {
            assert_eq!(kind.pool_name().parse::<NumberKind>().unwrap(), kind);
        }
        assert!("quote".parse::<NumberKind>().is_err());
        assert!("identifier:unknown".parse::<NumberKind>().is_err());
    }

    #[test]
    fn test_environment_accepts_short_names() {
        assert_eq!(
            "prod".parse::<DeploymentEnvironment>().unwrap(),
            DeploymentEnvironment::Production
        );
        assert_eq!(
            "Development".parse::<DeploymentEnvironment>().unwrap(),
            DeploymentEnvironment::Development
        );
        assert!("qa".parse::<DeploymentEnvironment>().is_err());
    }
}
