//! Ticketing domain catalog
//!
//! One variant per entity type. Each variant carries its descriptor, the
//! column list used for export order, and the DDL that creates its table.

use super::registry::{EntityDescriptor, ForeignKey, SchemaError, SchemaRegistry};

/// Column holding the soft-delete timestamp on entities that support it
pub const SOFT_DELETE_COLUMN: &str = "deletedAt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    User,
    Seller,
    Category,
    Event,
    TicketType,
    Order,
    Ticket,
    PromoCode,
    EventStats,
}

impl EntityKind {
    pub const ALL: [EntityKind; 9] = [
        EntityKind::User,
        EntityKind::Seller,
        EntityKind::Category,
        EntityKind::Event,
        EntityKind::TicketType,
        EntityKind::Order,
        EntityKind::Ticket,
        EntityKind::PromoCode,
        EntityKind::EventStats,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EntityKind::User => "User",
            EntityKind::Seller => "Seller",
            EntityKind::Category => "Category",
            EntityKind::Event => "Event",
            EntityKind::TicketType => "TicketType",
            EntityKind::Order => "Order",
            EntityKind::Ticket => "Ticket",
            EntityKind::PromoCode => "PromoCode",
            EntityKind::EventStats => "EventStats",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.name() == name)
    }

    pub fn descriptor(&self) -> EntityDescriptor {
        let d = EntityDescriptor::new(self.name(), self.primary_key());
        match self {
            EntityKind::User => d,
            EntityKind::Seller => d.with_foreign_key(ForeignKey::optional("userId", "User")),
            EntityKind::Category => {
                d.with_foreign_key(ForeignKey::optional("parentId", "Category"))
            }
            EntityKind::Event => d
                .with_foreign_key(ForeignKey::required("sellerId", "Seller"))
                .with_foreign_key(ForeignKey::optional("categoryId", "Category")),
            EntityKind::TicketType => {
                d.with_foreign_key(ForeignKey::required("eventId", "Event"))
            }
            EntityKind::Order => d
                .with_foreign_key(ForeignKey::required("userId", "User"))
                .with_foreign_key(ForeignKey::required("eventId", "Event")),
            EntityKind::Ticket => d
                .with_foreign_key(ForeignKey::required("orderId", "Order"))
                .with_foreign_key(ForeignKey::required("ticketTypeId", "TicketType"))
                .with_foreign_key(ForeignKey::optional("transferredFromId", "Ticket")),
            EntityKind::PromoCode => {
                d.with_foreign_key(ForeignKey::optional("eventId", "Event"))
            }
            EntityKind::EventStats => {
                d.with_foreign_key(ForeignKey::required("eventId", "Event"))
            }
        }
    }

    pub fn primary_key(&self) -> &'static str {
        match self {
            EntityKind::EventStats => "eventId",
            _ => "id",
        }
    }

    /// Columns in export order
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            EntityKind::User => &["id", "email", "name", "role", "createdAt", "deletedAt"],
            EntityKind::Seller => &[
                "id",
                "userId",
                "displayName",
                "bankAccountNumber",
                "createdAt",
                "deletedAt",
            ],
            EntityKind::Category => &["id", "parentId", "name"],
            EntityKind::Event => &[
                "id",
                "sellerId",
                "categoryId",
                "title",
                "venue",
                "startsAt",
                "createdAt",
                "deletedAt",
            ],
            EntityKind::TicketType => &["id", "eventId", "name", "priceCents", "quantity"],
            EntityKind::Order => &["id", "userId", "eventId", "status", "totalCents", "createdAt"],
            EntityKind::Ticket => &[
                "id",
                "orderId",
                "ticketTypeId",
                "transferredFromId",
                "holderName",
                "createdAt",
                "deletedAt",
            ],
            EntityKind::PromoCode => &["id", "eventId", "code", "discountPercent"],
            EntityKind::EventStats => &["eventId", "ticketsSold", "revenueCents", "refreshedAt"],
        }
    }

    pub fn supports_soft_delete(&self) -> bool {
        self.columns().contains(&SOFT_DELETE_COLUMN)
    }

    /// Derived tables that snapshots leave out
    pub fn is_excluded_from_snapshots(&self) -> bool {
        matches!(self, EntityKind::EventStats)
    }

    pub fn ddl(&self) -> &'static str {
        match self {
            EntityKind::User => {
                r#"CREATE TABLE IF NOT EXISTS "User" (
                    "id" TEXT PRIMARY KEY,
                    "email" TEXT NOT NULL UNIQUE,
                    "name" TEXT NOT NULL,
                    "role" TEXT NOT NULL DEFAULT 'customer',
                    "createdAt" TEXT NOT NULL,
                    "deletedAt" TEXT
                );"#
            }
            EntityKind::Seller => {
                r#"CREATE TABLE IF NOT EXISTS "Seller" (
                    "id" TEXT PRIMARY KEY,
                    "userId" TEXT REFERENCES "User"("id"),
                    "displayName" TEXT NOT NULL,
                    "bankAccountNumber" TEXT,
                    "createdAt" TEXT NOT NULL,
                    "deletedAt" TEXT
                );"#
            }
            EntityKind::Category => {
                r#"CREATE TABLE IF NOT EXISTS "Category" (
                    "id" TEXT PRIMARY KEY,
                    "parentId" TEXT REFERENCES "Category"("id"),
                    "name" TEXT NOT NULL
                );"#
            }
            EntityKind::Event => {
                r#"CREATE TABLE IF NOT EXISTS "Event" (
                    "id" TEXT PRIMARY KEY,
                    "sellerId" TEXT NOT NULL REFERENCES "Seller"("id"),
                    "categoryId" TEXT REFERENCES "Category"("id"),
                    "title" TEXT NOT NULL,
                    "venue" TEXT,
                    "startsAt" TEXT,
                    "createdAt" TEXT NOT NULL,
                    "deletedAt" TEXT
                );"#
            }
            EntityKind::TicketType => {
                r#"CREATE TABLE IF NOT EXISTS "TicketType" (
                    "id" TEXT PRIMARY KEY,
                    "eventId" TEXT NOT NULL REFERENCES "Event"("id"),
                    "name" TEXT NOT NULL,
                    "priceCents" INTEGER NOT NULL,
                    "quantity" INTEGER NOT NULL
                );"#
            }
            EntityKind::Order => {
                r#"CREATE TABLE IF NOT EXISTS "Order" (
                    "id" TEXT PRIMARY KEY,
                    "userId" TEXT NOT NULL REFERENCES "User"("id"),
                    "eventId" TEXT NOT NULL REFERENCES "Event"("id"),
                    "status" TEXT NOT NULL,
                    "totalCents" INTEGER NOT NULL,
                    "createdAt" TEXT NOT NULL
                );"#
            }
            EntityKind::Ticket => {
                r#"CREATE TABLE IF NOT EXISTS "Ticket" (
                    "id" TEXT PRIMARY KEY,
                    "orderId" TEXT NOT NULL REFERENCES "Order"("id"),
                    "ticketTypeId" TEXT NOT NULL REFERENCES "TicketType"("id"),
                    "transferredFromId" TEXT REFERENCES "Ticket"("id"),
                    "holderName" TEXT,
                    "createdAt" TEXT NOT NULL,
                    "deletedAt" TEXT
                );"#
            }
            EntityKind::PromoCode => {
                r#"CREATE TABLE IF NOT EXISTS "PromoCode" (
                    "id" TEXT PRIMARY KEY,
                    "eventId" TEXT REFERENCES "Event"("id"),
                    "code" TEXT NOT NULL UNIQUE,
                    "discountPercent" INTEGER NOT NULL
                );"#
            }
            EntityKind::EventStats => {
                r#"CREATE TABLE IF NOT EXISTS "EventStats" (
                    "eventId" TEXT PRIMARY KEY REFERENCES "Event"("id"),
                    "ticketsSold" INTEGER NOT NULL DEFAULT 0,
                    "revenueCents" INTEGER NOT NULL DEFAULT 0,
                    "refreshedAt" TEXT
                );"#
            }
        }
    }
}

/// Registry for the ticketing catalog. A cycle here is a programming error and
/// callers treat it as fatal.
pub fn registry() -> Result<SchemaRegistry, SchemaError> {
    let descriptors = EntityKind::ALL.iter().map(|k| k.descriptor()).collect();
    let excluded = EntityKind::ALL
        .iter()
        .filter(|k| k.is_excluded_from_snapshots())
        .map(|k| k.name());
    SchemaRegistry::with_exclusions(descriptors, excluded)
}

/// DDL for every catalog table, parents first
pub fn ddl() -> String {
    EntityKind::ALL
        .iter()
        .map(|k| k.ddl())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_registry_builds() {
        let registry = registry().unwrap();
        assert_eq!(registry.len(), EntityKind::ALL.len());

        let order = registry.topological_order();
        let pos = |name: &str| order.iter().position(|n| n == name).unwrap();
        assert!(pos("Seller") < pos("Event"));
        assert!(pos("Event") < pos("TicketType"));
        assert!(pos("Order") < pos("Ticket"));
        assert!(pos("TicketType") < pos("Ticket"));
        assert!(registry.is_excluded("EventStats"));
    }

    #[test]
    fn test_descriptor_fields_are_columns() {
        for kind in EntityKind::ALL {
            let d = kind.descriptor();
            assert!(kind.columns().contains(&d.primary_key.as_str()));
            for fk in &d.foreign_keys {
                assert!(
                    kind.columns().contains(&fk.field.as_str()),
                    "{}.{} missing from columns",
                    kind.name(),
                    fk.field
                );
            }
            assert_eq!(EntityKind::from_name(kind.name()), Some(kind));
        }
    }

    #[test]
    fn test_soft_delete_support() {
        assert!(EntityKind::User.supports_soft_delete());
        assert!(EntityKind::Ticket.supports_soft_delete());
        assert!(!EntityKind::Order.supports_soft_delete());
    }
}
