//! City traffic simulation.
//!
//! Vehicles shuttle back and forth along straight road segments laid out
//! around a centre point, with randomly drifting speeds. Each step yields one
//! ping per vehicle.

use chrono::{DateTime, Utc};
use rand::Rng;
use traffic_core::spatial::{bearing_degrees, interpolate, offset_by_bearing};
use traffic_core::{GeoPoint, Ping, RoadId, RoadSegment};

const MIN_SPEED_KMH: f64 = 10.0;
const MAX_SPEED_KMH: f64 = 120.0;
/// Chance per step that a vehicle changes speed
const SPEED_CHANGE_PROBABILITY: f64 = 0.2;
const MAX_SPEED_CHANGE_KMH: f64 = 10.0;

/// (name, bearing, max speed, capacity, road type)
const CITY_ROADS: [(&str, f64, i32, u32, &str); 4] = [
    ("North Avenue", 0.0, 60, 120, "urban"),
    ("East Expressway", 90.0, 100, 300, "highway"),
    ("South Street", 180.0, 50, 80, "urban"),
    ("West Boulevard", 270.0, 80, 200, "arterial"),
];
const ROAD_INNER_KM: f64 = 0.5;
const ROAD_OUTER_KM: f64 = 4.0;
const VEHICLE_TYPES: [&str; 3] = ["car", "truck", "bus"];

pub struct Scenario {
    pub name: String,
    pub roads: Vec<RoadSegment>,
    pub vehicles: Vec<SimVehicle>,
}

impl Scenario {
    /// Renumber the roads consecutively from `first_id`, keeping vehicles on
    /// the same roads.
    pub fn with_road_ids_from(mut self, first_id: RoadId) -> Self {
        let offset = first_id.saturating_sub(1);
        for road in &mut self.roads {
            road.id += offset;
        }
        for vehicle in &mut self.vehicles {
            vehicle.road.id += offset;
        }
        self
    }
}

/// Radial roads around `center` and `vehicle_count` vehicles spread across them.
pub fn city_scenario(center: GeoPoint, vehicle_count: usize) -> Scenario {
    let roads: Vec<RoadSegment> = CITY_ROADS
        .iter()
        .enumerate()
        .map(|(i, (name, bearing, max_speed, capacity, road_type))| {
            let start = offset_by_bearing(center, ROAD_INNER_KM, *bearing);
            let end = offset_by_bearing(center, ROAD_OUTER_KM, *bearing);
            RoadSegment {
                id: i as u64 + 1,
                name: name.to_string(),
                start_lon: start.lon,
                start_lat: start.lat,
                end_lon: end.lon,
                end_lat: end.lat,
                max_speed: *max_speed,
                capacity: *capacity,
                length_km: Some(ROAD_OUTER_KM - ROAD_INNER_KM),
                road_type: road_type.to_string(),
            }
        })
        .collect();

    let vehicles = (0..vehicle_count)
        .map(|i| {
            let road = roads[i % roads.len()].clone();
            // Start around the limit; some vehicles begin well over it.
            let speed_kmh = f64::from(road.max_speed) * if i % 3 == 1 { 1.4 } else { 0.8 };
            SimVehicle {
                vehicle_id: format!("V{:03}", i + 1),
                vehicle_type: VEHICLE_TYPES[i % VEHICLE_TYPES.len()].to_string(),
                progress: (i as f64 * 0.17) % 1.0,
                forward: i % 2 == 0,
                speed_kmh: speed_kmh.clamp(MIN_SPEED_KMH, MAX_SPEED_KMH),
                road,
            }
        })
        .collect();

    Scenario {
        name: "city".to_string(),
        roads,
        vehicles,
    }
}

#[derive(Debug, Clone)]
pub struct SimVehicle {
    pub vehicle_id: String,
    pub vehicle_type: String,
    pub road: RoadSegment,
    /// Position along the road in [0, 1]
    pub progress: f64,
    pub forward: bool,
    pub speed_kmh: f64,
}

impl SimVehicle {
    pub fn position(&self) -> GeoPoint {
        interpolate(self.road.start(), self.road.end(), self.progress)
    }

    pub fn heading(&self) -> f64 {
        let (from, to) = if self.forward {
            (self.road.start(), self.road.end())
        } else {
            (self.road.end(), self.road.start())
        };
        bearing_degrees(from, to)
    }

    /// Advance by `dt_secs`, turning around at either end of the road.
    pub fn advance(&mut self, dt_secs: f64) {
        let length = self.road.length_km();
        if length <= 0.0 {
            return;
        }
        let step = self.speed_kmh * dt_secs / 3600.0 / length;
        let mut next = if self.forward {
            self.progress + step
        } else {
            self.progress - step
        };

        if next > 1.0 {
            next = 2.0 - next;
            self.forward = false;
        } else if next < 0.0 {
            next = -next;
            self.forward = true;
        }
        self.progress = next.clamp(0.0, 1.0);
    }

    pub fn jitter_speed<R: Rng>(&mut self, rng: &mut R) {
        if rng.random_bool(SPEED_CHANGE_PROBABILITY) {
            let change = rng.random_range(-MAX_SPEED_CHANGE_KMH..=MAX_SPEED_CHANGE_KMH);
            self.speed_kmh = (self.speed_kmh + change).clamp(MIN_SPEED_KMH, MAX_SPEED_KMH);
        }
    }

    pub fn ping(&self, timestamp: DateTime<Utc>) -> Ping {
        let position = self.position();
        let mut ping = Ping::new(
            self.vehicle_id.clone(),
            position.lon,
            position.lat,
            self.speed_kmh.round() as i32,
            timestamp,
        )
        .with_road(self.road.id)
        .with_direction(self.heading().round() as i32);
        ping.vehicle_type = self.vehicle_type.clone();
        ping
    }
}

/// Mutable simulation run over a fixed set of vehicles.
pub struct Simulation {
    vehicles: Vec<SimVehicle>,
}

impl Simulation {
    pub fn new(vehicles: Vec<SimVehicle>) -> Self {
        Self { vehicles }
    }

    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    /// Move every vehicle and return their pings stamped with `now`.
    pub fn step(&mut self, dt_secs: f64, now: DateTime<Utc>) -> Vec<Ping> {
        let mut rng = rand::rng();
        self.vehicles
            .iter_mut()
            .map(|vehicle| {
                vehicle.jitter_speed(&mut rng);
                vehicle.advance(dt_secs);
                vehicle.ping(now)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn center() -> GeoPoint {
        GeoPoint::new(116.4074, 39.9042)
    }

    #[test]
    fn scenario_builds_radial_roads() {
        let scenario = city_scenario(center(), 6);
        assert_eq!(scenario.roads.len(), 4);
        assert_eq!(scenario.vehicles.len(), 6);

        let east = &scenario.roads[1];
        assert!(east.end_lon > east.start_lon);
        assert!((east.start_lat - center().lat).abs() < 1e-4);
        assert_eq!(east.length_km(), 3.5);
    }

    #[test]
    fn renumbered_scenario_keeps_vehicles_on_their_roads() {
        let scenario = city_scenario(center(), 4).with_road_ids_from(11);
        let ids: Vec<RoadId> = scenario.roads.iter().map(|road| road.id).collect();
        assert_eq!(ids, vec![11, 12, 13, 14]);
        for (vehicle, road) in scenario.vehicles.iter().zip(&scenario.roads) {
            assert_eq!(vehicle.road, *road);
            assert_eq!(vehicle.ping(Utc::now()).road_id, Some(road.id));
        }
    }

    #[test]
    fn vehicles_stay_on_their_road() {
        let scenario = city_scenario(center(), 8);
        let mut sim = Simulation::new(scenario.vehicles);
        for _ in 0..600 {
            for ping in sim.step(1.0, Utc::now()) {
                assert!(ping.validate().is_ok());
                let road = scenario
                    .roads
                    .iter()
                    .find(|road| Some(road.id) == ping.road_id)
                    .unwrap();
                let (lo_lon, hi_lon) = (road.start_lon.min(road.end_lon), road.start_lon.max(road.end_lon));
                let (lo_lat, hi_lat) = (road.start_lat.min(road.end_lat), road.start_lat.max(road.end_lat));
                assert!(ping.lon >= lo_lon - 1e-9 && ping.lon <= hi_lon + 1e-9);
                assert!(ping.lat >= lo_lat - 1e-9 && ping.lat <= hi_lat + 1e-9);
                assert!((10..=120).contains(&ping.speed));
            }
        }
    }

    #[test]
    fn vehicle_turns_around_at_the_end() {
        let mut vehicle = city_scenario(center(), 1).vehicles.remove(0);
        vehicle.progress = 0.99;
        vehicle.forward = true;
        vehicle.speed_kmh = 3600.0;
        vehicle.advance(1.0);
        assert!(!vehicle.forward);
        assert!(vehicle.progress <= 1.0);

        let heading = vehicle.heading();
        assert!((heading - 180.0).abs() < 1.0, "got {heading}");
    }
}
