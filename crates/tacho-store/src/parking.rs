use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument};

use tacho_core::errors::LocatorError;
use tacho_core::ids::ParkingId;
use tacho_core::location::{GeoPoint, ParkingLocator, ParkingSummary};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{self, format_ts};

/// Kilometres per degree of latitude, used for the bounding-box prefilter.
const KM_PER_DEGREE_LAT: f64 = 111.0;

/// A truck park to insert.
#[derive(Clone, Debug)]
pub struct NewTruckPark {
    pub name: &'static str,
    pub address: &'static str,
    pub country: &'static str,
    pub lat: f64,
    pub lng: f64,
    pub total_spaces: Option<i64>,
    pub has_security: bool,
    pub has_showers: bool,
    pub price_per_night_eur: Option<f64>,
    pub is_free: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub inserted: usize,
    pub skipped: usize,
    pub total: usize,
}

pub struct ParkingRepo {
    db: Database,
}

impl ParkingRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a park unless one with the same name and country exists.
    /// Returns whether a row was written.
    pub fn insert(&self, park: &NewTruckPark) -> Result<bool, StoreError> {
        let id = ParkingId::new();
        let now = format_ts(Utc::now());
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO truck_parks
                    (id, name, address, country, lat, lng, total_spaces, has_security,
                     has_showers, price_per_night_eur, is_free, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                rusqlite::params![
                    id.as_str(),
                    park.name,
                    park.address,
                    park.country,
                    park.lat,
                    park.lng,
                    park.total_spaces,
                    park.has_security,
                    park.has_showers,
                    park.price_per_night_eur,
                    park.is_free,
                    now,
                ],
            )?;
            Ok(changed == 1)
        })
    }

    /// Insert the built-in European truck parks. Safe to run repeatedly.
    #[instrument(skip(self))]
    pub fn seed_defaults(&self) -> Result<SeedReport, StoreError> {
        let mut report = SeedReport {
            total: DEFAULT_TRUCK_PARKS.len(),
            ..Default::default()
        };
        for park in DEFAULT_TRUCK_PARKS {
            if self.insert(park)? {
                report.inserted += 1;
            } else {
                report.skipped += 1;
            }
        }
        info!(inserted = report.inserted, skipped = report.skipped, "truck parks seeded");
        Ok(report)
    }

    /// Parks within `radius_km` of `point`, nearest first.
    #[instrument(skip(self), fields(lat = point.lat, lng = point.lng))]
    pub fn within(
        &self,
        point: GeoPoint,
        radius_km: f64,
        limit: usize,
    ) -> Result<Vec<ParkingSummary>, StoreError> {
        let lat_span = radius_km / KM_PER_DEGREE_LAT;
        let candidates = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, address, country, lat, lng, total_spaces, has_security,
                        has_showers, price_per_night_eur, is_free
                 FROM truck_parks WHERE lat BETWEEN ?1 AND ?2",
            )?;
            let mut rows = stmt.query(rusqlite::params![point.lat - lat_span, point.lat + lat_span])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_parking(row, &point)?);
            }
            Ok(results)
        })?;

        let mut nearby: Vec<ParkingSummary> = candidates
            .into_iter()
            .filter(|p| p.distance_km <= radius_km)
            .collect();
        nearby.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
        nearby.truncate(limit);
        Ok(nearby)
    }

    pub fn nearest(&self, point: GeoPoint, radius_km: f64) -> Result<Option<ParkingSummary>, StoreError> {
        Ok(self.within(point, radius_km, 1)?.into_iter().next())
    }

    pub fn count(&self) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM truck_parks", [], |row| row.get(0))?)
        })
    }
}

fn row_to_parking(row: &rusqlite::Row<'_>, origin: &GeoPoint) -> Result<ParkingSummary, StoreError> {
    let lat: f64 = row_helpers::get(row, 4, "truck_parks", "lat")?;
    let lng: f64 = row_helpers::get(row, 5, "truck_parks", "lng")?;
    let distance_km = origin.distance_km(&GeoPoint { lat, lng });

    Ok(ParkingSummary {
        id: ParkingId::from_raw(row_helpers::get::<String>(row, 0, "truck_parks", "id")?),
        name: row_helpers::get(row, 1, "truck_parks", "name")?,
        address: row_helpers::get_opt(row, 2, "truck_parks", "address")?,
        country: row_helpers::get(row, 3, "truck_parks", "country")?,
        lat,
        lng,
        distance_km,
        total_spaces: row_helpers::get_opt(row, 6, "truck_parks", "total_spaces")?,
        has_security: row_helpers::get(row, 7, "truck_parks", "has_security")?,
        has_showers: row_helpers::get(row, 8, "truck_parks", "has_showers")?,
        price_per_night_eur: row_helpers::get_opt(row, 9, "truck_parks", "price_per_night_eur")?,
        is_free: row_helpers::get(row, 10, "truck_parks", "is_free")?,
    })
}

/// Location collaborator backed by the local truck-park table.
pub struct SqliteParkingLocator {
    repo: ParkingRepo,
}

impl SqliteParkingLocator {
    pub fn new(db: Database) -> Self {
        Self {
            repo: ParkingRepo::new(db),
        }
    }
}

#[async_trait]
impl ParkingLocator for SqliteParkingLocator {
    fn name(&self) -> &str {
        "local"
    }

    async fn find_nearest_parking(
        &self,
        point: GeoPoint,
        radius_km: f64,
    ) -> Result<Option<ParkingSummary>, LocatorError> {
        self.repo
            .nearest(point, radius_km)
            .map_err(|e| LocatorError::Unavailable(e.to_string()))
    }
}

macro_rules! park {
    ($name:expr, $address:expr, $country:expr, $lat:expr, $lng:expr, $spaces:expr,
     security: $security:expr, showers: $showers:expr, price: $price:expr, free: $free:expr) => {
        NewTruckPark {
            name: $name,
            address: $address,
            country: $country,
            lat: $lat,
            lng: $lng,
            total_spaces: Some($spaces),
            has_security: $security,
            has_showers: $showers,
            price_per_night_eur: $price,
            is_free: $free,
        }
    };
}

/// Built-in European truck parks along major freight corridors.
pub const DEFAULT_TRUCK_PARKS: &[NewTruckPark] = &[
    park!("Rasthof Helmstedt Nord", "A2 km 242, 38350 Helmstedt", "DE", 52.2167, 11.0167, 150, security: true, showers: true, price: Some(15.0), free: false),
    park!("Autohof Peine", "Im Gewerbepark 15, 31228 Peine", "DE", 52.3167, 10.2333, 200, security: true, showers: true, price: Some(20.0), free: false),
    park!("Rasthof Münsterland West", "A1 km 268, 48268 Greven", "DE", 52.0833, 7.6500, 120, security: false, showers: false, price: None, free: true),
    park!("MOP Konin", "A2 km 289, 62-510 Konin", "PL", 52.2167, 18.2500, 180, security: true, showers: true, price: Some(10.0), free: false),
    park!("Truck Stop Koło", "ul. Toruńska 200, 62-600 Koło", "PL", 52.2000, 18.6333, 100, security: true, showers: true, price: Some(8.0), free: false),
    park!("Truckparking Veenendaal", "De Smalle Zijde 40, 3903 LP Veenendaal", "NL", 52.0167, 5.5333, 250, security: true, showers: true, price: Some(25.0), free: false),
    park!("De Bolder Truck Parking", "Energieweg 2, 3542 DZ Utrecht", "NL", 52.1000, 5.0333, 180, security: true, showers: true, price: Some(28.0), free: false),
    park!("Total Aire de Heverlee", "E40 km 23, 3001 Heverlee", "BE", 50.8667, 4.6833, 80, security: false, showers: false, price: None, free: true),
    park!("Aire de Ressons-Ouest", "A1 km 90, 60490 Ressons-sur-Matz", "FR", 49.5500, 2.7500, 200, security: true, showers: true, price: Some(18.0), free: false),
    park!("Área de Servicio La Junquera", "AP-7 km 2, 17700 La Jonquera", "ES", 42.4167, 2.8667, 300, security: true, showers: true, price: Some(22.0), free: false),
    park!("Área de Servicio Lleida", "A-2 km 457, 25190 Lleida", "ES", 41.6167, 0.6333, 150, security: true, showers: true, price: Some(15.0), free: false),
    park!("Area di Servizio Secchia Ovest", "A1 km 162, 41058 Vignola", "IT", 44.4500, 11.0000, 180, security: true, showers: true, price: Some(20.0), free: false),
    park!("Truckparkplatz Innsbruck", "Grabenweg 68, 6020 Innsbruck", "AT", 47.2500, 11.3833, 120, security: true, showers: true, price: Some(30.0), free: false),
    park!("OMV Velká Bíteš", "D1 km 153, 595 01 Velká Bíteš", "CZ", 49.2833, 16.2167, 100, security: false, showers: true, price: None, free: true),
    park!("MOL Töltőállomás Győr", "M1 km 108, 9024 Győr", "HU", 47.6833, 17.6333, 130, security: true, showers: true, price: Some(12.0), free: false),
    park!("Petrom Peco Pitești", "A1 km 109, 110224 Pitești", "RO", 44.8500, 24.8667, 80, security: true, showers: true, price: Some(8.0), free: false),
    park!("OMV Plovdiv", "A1 km 132, 4000 Plovdiv", "BG", 42.1500, 24.7500, 70, security: true, showers: true, price: Some(6.0), free: false),
    park!("Circle K Truck Stop Kaunas", "A1 km 102, 54340 Kaunas", "LT", 54.9000, 23.9000, 100, security: true, showers: true, price: Some(10.0), free: false),
    park!("Opet Petrol Edirne", "D100 km 5, 22030 Edirne", "TR", 41.6667, 26.5500, 200, security: true, showers: true, price: Some(5.0), free: false),
    park!("Truckhaven Lymm Services", "M6 J20, Lymm WA13 0SP", "GB", 53.3833, -2.4667, 120, security: true, showers: true, price: Some(30.0), free: false),
    park!("Donington Park Services", "A50/M1, Castle Donington DE74 2TN", "GB", 52.8333, -1.3667, 200, security: true, showers: true, price: Some(28.0), free: false),
];
