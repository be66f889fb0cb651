use clap::{Parser, Subcommand};
use clinic_core::{
    BedService, CoreConfig, NewVisit, NonEmptyText, Store, TriageLevel, VisitService, VisitType,
};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "clinic")]
#[command(about = "Clinic visit core administration CLI")]
struct Cli {
    /// SQLite database file (default: $CLINIC_DATABASE_PATH or clinic.db)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    InitDb,
    /// Create a room with all beds free
    CreateRoom {
        /// Room label, e.g. "101"
        name: String,
        /// Number of beds
        beds: i64,
    },
    /// Put a room under maintenance, or take it out with --off
    Maintenance {
        room_id: Uuid,
        #[arg(long)]
        off: bool,
    },
    /// Register a visit
    RegisterVisit {
        patient_id: String,
        /// outpatient, inpatient or emergency
        visit_type: VisitType,
        /// Poli for outpatient visits
        #[arg(long)]
        poli: Option<String>,
        /// Triage level 1-5 for emergency visits
        #[arg(long)]
        triage: Option<u8>,
    },
    /// Show a room and its occupied beds
    Occupancy { room_id: Uuid },
    /// Show a visit with its record, billing and bed
    Visit { visit_id: Uuid },
}

fn open_store(database: Option<PathBuf>) -> Result<Store, Box<dyn std::error::Error>> {
    let path = database
        .or_else(|| std::env::var("CLINIC_DATABASE_PATH").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(clinic_core::constants::DEFAULT_DATABASE_PATH));
    let cfg = CoreConfig::with_database(path)?;
    Ok(Store::open(Arc::new(cfg))?)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        println!("No command given. Run `clinic --help` for usage.");
        return Ok(());
    };
    let store = open_store(cli.database)?;

    match command {
        Commands::InitDb => {
            println!(
                "Database ready at {}",
                store.config().database_path().display()
            );
        }
        Commands::CreateRoom { name, beds } => {
            let service = BedService::new(store);
            match service.create_room(&NonEmptyText::new(name)?, beds) {
                Ok(room) => println!(
                    "Created room {} ({} beds) with ID: {}",
                    room.name, room.bed_count, room.id
                ),
                Err(e) => eprintln!("Error creating room: {}", e),
            }
        }
        Commands::Maintenance { room_id, off } => {
            match BedService::new(store).set_maintenance(room_id, !off) {
                Ok(room) => println!("Room {} is now {}", room.name, room.status),
                Err(e) => eprintln!("Error updating room: {}", e),
            }
        }
        Commands::RegisterVisit {
            patient_id,
            visit_type,
            poli,
            triage,
        } => {
            let new_visit = NewVisit {
                patient_id: NonEmptyText::new(patient_id)?,
                visit_type,
                poli_id: poli.map(NonEmptyText::new).transpose()?,
                triage_level: triage.map(TriageLevel::new).transpose()?,
                notes: None,
            };
            match VisitService::new(store).register(&new_visit) {
                Ok(visit) => match visit.queue_number {
                    Some(queue) => println!("Registered visit {} (queue {})", visit.id, queue),
                    None => println!("Registered visit {}", visit.id),
                },
                Err(e) => eprintln!("Error registering visit: {}", e),
            }
        }
        Commands::Occupancy { room_id } => match BedService::new(store).room_occupancy(room_id) {
            Ok(occupancy) => {
                let room = occupancy.room;
                println!(
                    "Room {} [{}]: {}/{} beds free",
                    room.name, room.status, room.available_beds, room.bed_count
                );
                if occupancy.active_assignments.is_empty() {
                    println!("No occupied beds.");
                }
                for assignment in occupancy.active_assignments {
                    println!(
                        "Bed {}: visit {} since {}",
                        assignment.bed_number, assignment.visit_id, assignment.assigned_at
                    );
                }
            }
            Err(e) => eprintln!("Error reading room: {}", e),
        },
        Commands::Visit { visit_id } => match VisitService::new(store).overview(visit_id) {
            Ok(overview) => {
                let visit = overview.visit;
                println!(
                    "Visit {} ({}) for patient {}: {}",
                    visit.id, visit.visit_type, visit.patient_id, visit.status
                );
                if let Some(record) = overview.record {
                    println!(
                        "Medical record {}: {}",
                        record.id,
                        if record.is_locked { "locked" } else { "draft" }
                    );
                }
                if let Some(statement) = overview.billing {
                    let billing = statement.billing;
                    println!(
                        "Billing: {} of {} paid ({})",
                        billing.paid_amount, billing.total_amount, billing.payment_status
                    );
                }
                if let Some(assignment) = overview.active_assignment {
                    println!("Bed {} in room {}", assignment.bed_number, assignment.room_id);
                }
                if overview.has_discharge_summary {
                    println!("Discharge summary recorded.");
                }
            }
            Err(e) => eprintln!("Error reading visit: {}", e),
        },
    }

    Ok(())
}
