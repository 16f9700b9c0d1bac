// Community Registry CLI
// Thin driver over the Registry: CSV import, search, duplicate checks,
// family trees, the recent-actions feed and the sync hand-off.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use community_registry::{
    ActionKind, AuditFilter, EntityClass, Gender, House, Member, MemberStatus, ParentQuery,
    Registry, RegistryConfig, Relation,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[clap(name = "community-registry")]
#[clap(about = "Member registry: identity resolution, duplicates and family relations")]
struct Cli {
    /// TOML configuration file
    #[clap(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// SQLite database (overrides the config file)
    #[clap(long, value_name = "FILE", env = "REGISTRY_DB")]
    db: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import houses and/or members from CSV
    Import {
        #[clap(long, value_name = "CSV")]
        houses: Option<PathBuf>,
        #[clap(long, value_name = "CSV")]
        members: Option<PathBuf>,
    },

    /// Fuzzy member search
    Search { term: String },

    /// Candidates for a father/mother/spouse link
    Parents {
        #[clap(long, default_value = "")]
        name: String,
        #[clap(long, default_value = "")]
        surname: String,
        #[clap(long, default_value = "")]
        father: String,
        #[clap(long, default_value = "")]
        grandfather: String,
        #[clap(long, default_value = "")]
        spouse: String,
        #[clap(long, default_value = "")]
        house: String,
    },

    /// Houses similar to a house name / family name
    HouseDuplicates {
        house_name: String,
        #[clap(default_value = "")]
        family_name: String,
    },

    /// Members similar to a name / surname
    MemberDuplicates {
        name: String,
        #[clap(default_value = "")]
        surname: String,
    },

    /// Immediate family of a member
    Tree { member_id: String },

    /// Recent actions feed
    Actions {
        #[clap(long)]
        class: Option<String>,
        #[clap(long)]
        action: Option<String>,
        #[clap(long)]
        pending: bool,
        #[clap(long, default_value = "1")]
        page: usize,
        #[clap(long, default_value = "20")]
        page_size: usize,
    },

    /// Print the next batch of pending audit entries as JSON lines and mark them synced
    Sync {
        #[clap(long)]
        dry_run: bool,
    },

    /// Obligation statistics for one sub-collection
    Stats {
        #[clap(long)]
        subcollection: Option<i64>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => RegistryConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => RegistryConfig::from_env(),
    };
    if let Some(db) = &cli.db {
        config.database.path = db.clone();
    }

    let mut registry = Registry::open(config).context("opening registry database")?;

    match cli.command {
        Command::Import { houses, members } => {
            if houses.is_none() && members.is_none() {
                bail!("nothing to import: pass --houses and/or --members");
            }
            if let Some(path) = houses {
                import_houses(&mut registry, &path)?;
            }
            if let Some(path) = members {
                import_members(&mut registry, &path)?;
            }
        }
        Command::Search { term } => run_search(&registry, &term)?,
        Command::Parents {
            name,
            surname,
            father,
            grandfather,
            spouse,
            house,
        } => {
            let query = ParentQuery {
                name,
                surname,
                father,
                grandfather,
                spouse,
                house,
            };
            for m in registry.search_parents(&query)? {
                println!(
                    "{:>6}  {:<28} father: {:<20} house: {:<20} {:.2}",
                    m.member.member_id,
                    m.member.full_name(),
                    m.father_name,
                    m.house_name,
                    m.score
                );
            }
        }
        Command::HouseDuplicates {
            house_name,
            family_name,
        } => {
            for m in registry.house_duplicates(&house_name, &family_name)? {
                println!("⚠️  {:.2}  {}", m.confidence, m.reason);
            }
        }
        Command::MemberDuplicates { name, surname } => {
            for m in registry.member_duplicates(&name, &surname)? {
                println!("⚠️  {:.2}  {}", m.confidence, m.reason);
            }
        }
        Command::Tree { member_id } => run_tree(&registry, &member_id)?,
        Command::Actions {
            class,
            action,
            pending,
            page,
            page_size,
        } => {
            let filter = AuditFilter {
                entity_class: class
                    .as_deref()
                    .map(|c| EntityClass::parse(c).with_context(|| format!("unknown class '{}'", c)))
                    .transpose()?,
                action: action
                    .as_deref()
                    .map(|a| ActionKind::parse(a).with_context(|| format!("unknown action '{}'", a)))
                    .transpose()?,
                pending: pending.then_some(true),
                object_id: None,
            };
            let feed = registry.recent_actions(&filter, page, page_size)?;
            for entry in &feed.entries {
                println!(
                    "{}  {:<6} {:<10} {:>6}  {}{}",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.action.as_str(),
                    entry.entity_class.as_str(),
                    entry.object_id,
                    entry.description,
                    if entry.is_sync_pending { "  (pending)" } else { "" }
                );
            }
            println!(
                "page {} ({} of {} entries){}",
                feed.page,
                feed.entries.len(),
                feed.total,
                if feed.has_next() { ", more available" } else { "" }
            );
        }
        Command::Sync { dry_run } => {
            let batch = registry.pending_sync()?;
            for entry in &batch {
                println!("{}", serde_json::to_string(entry)?);
            }
            if !dry_run && !batch.is_empty() {
                let ids: Vec<String> = batch.iter().map(|e| e.entry_id.clone()).collect();
                let flipped = registry.mark_synced(&ids)?;
                info!(flipped, "Sync batch handed off");
            }
        }
        Command::Stats { subcollection } => {
            let stats = registry.obligation_statistics(subcollection)?;
            println!("📊 Sub-collection {}", stats.subcollection);
            println!("   total:   {} ({:.2})", stats.total, stats.total_amount);
            println!("   paid:    {} ({:.2})", stats.paid, stats.paid_amount);
            println!("   pending: {}", stats.pending);
            println!("   overdue: {}", stats.overdue);
            println!("   partial: {}", stats.partial);
            println!("   outstanding: {:.2}", stats.outstanding_amount());
        }
    }

    Ok(())
}

fn run_search(registry: &Registry, term: &str) -> Result<()> {
    let hits = registry.search(term)?;
    if hits.is_empty() {
        println!("No members match '{}'", term);
    }
    for hit in hits {
        println!(
            "{:>6}  {:<30} {:<20} {:.2}",
            hit.member.member_id,
            hit.member.full_name(),
            hit.house_name,
            hit.score
        );
    }
    Ok(())
}

fn run_tree(registry: &Registry, member_id: &str) -> Result<()> {
    let member = registry.member_by_member_id(member_id)?;
    let key = member.key.context("stored member without key")?;
    let tree = registry.family_tree(key)?;

    let show = |role: &str, m: &Option<Member>| match m {
        Some(m) => println!("   {:<8} {} ({})", role, m.full_name(), m.member_id),
        None => println!("   {:<8} -", role),
    };

    println!("🌳 {} ({})", tree.member.full_name(), tree.member.member_id);
    show("father", &tree.father);
    show("mother", &tree.mother);
    show("spouse", &tree.spouse);
    for child in &tree.children {
        println!("   child    {} ({})", child.full_name(), child.member_id);
    }
    for sibling in &tree.siblings {
        println!("   sibling  {} ({})", sibling.full_name(), sibling.member_id);
    }
    Ok(())
}

// ============================================================================
// CSV IMPORT
// ============================================================================

#[derive(Debug, Deserialize)]
struct HouseRow {
    #[serde(default)]
    home_id: String,
    house_name: String,
    family_name: String,
    #[serde(default)]
    location_name: String,
    #[serde(default)]
    address: String,
    area: String,
}

#[derive(Debug, Deserialize)]
struct MemberRow {
    #[serde(default)]
    member_id: String,
    name: String,
    #[serde(default)]
    surname: String,
    date_of_birth: String,
    #[serde(default)]
    date_of_death: String,
    #[serde(default)]
    gender: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    home_id: String,
    #[serde(default)]
    adhar: String,
    #[serde(default)]
    is_guardian: String,
    #[serde(default)]
    phone: String,
    #[serde(default)]
    father_member_id: String,
    #[serde(default)]
    father_name: String,
    #[serde(default)]
    mother_member_id: String,
    #[serde(default)]
    mother_name: String,
    #[serde(default)]
    spouse_member_id: String,
    #[serde(default)]
    spouse_name: String,
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .with_context(|| format!("invalid date '{}', expected YYYY-MM-DD", value))
}

fn import_houses(registry: &mut Registry, path: &Path) -> Result<()> {
    println!("📂 Importing houses from {}", path.display());
    let mut reader = csv::Reader::from_path(path).with_context(|| format!("opening {}", path.display()))?;

    let mut created = 0;
    for (line, row) in reader.deserialize::<HouseRow>().enumerate() {
        let row = row.with_context(|| format!("houses row {}", line + 1))?;
        let area = registry.area_named(&row.area)?;
        let area_key = area.key.context("stored area without key")?;

        let mut house = House::new(&row.house_name, &row.family_name, area_key);
        house.home_id = row.home_id.trim().to_string();
        house.location_name = row.location_name.trim().to_string();
        house.address = row.address;

        let duplicates = registry.house_duplicates(&house.house_name, &house.family_name)?;
        if let Some(best) = duplicates.first() {
            warn!(house = %house.house_name, similar = %best.entity.home_id, confidence = best.confidence, "Possible duplicate house");
        }

        registry
            .create_house(house)
            .with_context(|| format!("houses row {}", line + 1))?;
        created += 1;
    }

    println!("✓ {} houses imported", created);
    Ok(())
}

/// Two passes: members first (relations kept as names), then links by member_id,
/// so rows may reference members that appear later in the file
fn import_members(registry: &mut Registry, path: &Path) -> Result<()> {
    println!("📂 Importing members from {}", path.display());
    let mut reader = csv::Reader::from_path(path).with_context(|| format!("opening {}", path.display()))?;

    let mut pending_links = Vec::new();
    let mut keys: HashMap<String, i64> = HashMap::new();

    for (line, row) in reader.deserialize::<MemberRow>().enumerate() {
        let row: MemberRow = row.with_context(|| format!("members row {}", line + 1))?;

        let mut member = Member::new(&row.name, &row.surname, parse_date(&row.date_of_birth)?);
        member.member_id = row.member_id.trim().to_string();
        member.date_of_death = non_empty(&row.date_of_death).map(|d| parse_date(&d)).transpose()?;
        member.gender = Gender::parse(&row.gender);
        member.status = MemberStatus::parse(&row.status).unwrap_or_default();
        member.adhar = non_empty(&row.adhar);
        member.phone = non_empty(&row.phone);
        member.is_guardian = matches!(row.is_guardian.trim().to_lowercase().as_str(), "true" | "yes" | "1");
        member.father = Relation::unlinked(&row.father_name, "");
        member.mother = Relation::unlinked(&row.mother_name, "");
        member.spouse = Relation::unlinked(&row.spouse_name, "");
        if let Some(home_id) = non_empty(&row.home_id) {
            member.house = registry.house_by_home_id(&home_id)?.key;
        }

        let stored = registry
            .create_member(member)
            .with_context(|| format!("members row {}", line + 1))?;
        let key = stored.key.context("stored member without key")?;
        keys.insert(stored.member_id.clone(), key);

        pending_links.push((
            key,
            non_empty(&row.father_member_id),
            non_empty(&row.mother_member_id),
            non_empty(&row.spouse_member_id),
        ));
    }

    let lookup = |id: &Option<String>| -> Option<i64> {
        let id = id.as_ref()?;
        let key = keys.get(id).copied();
        if key.is_none() {
            warn!(member_id = %id, "Relation refers to a member not in this import; kept as name");
        }
        key
    };

    let mut linked = 0;
    for (key, father, mother, spouse) in &pending_links {
        let father = lookup(father);
        let mother = lookup(mother);
        if father.is_some() || mother.is_some() {
            registry.update_member_with(*key, |m| {
                if let Some(f) = father {
                    m.father = Relation::Linked {
                        key: f,
                        known_as: m.father.known_as().clone(),
                    };
                }
                if let Some(k) = mother {
                    m.mother = Relation::Linked {
                        key: k,
                        known_as: m.mother.known_as().clone(),
                    };
                }
            })?;
            linked += 1;
        }
        if let Some(spouse) = lookup(spouse) {
            registry.set_spouse(*key, spouse)?;
            linked += 1;
        }
    }

    println!("✓ {} members imported, {} relation updates", keys.len(), linked);
    Ok(())
}
