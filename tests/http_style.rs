#![cfg(feature = "http")]

use mapsnap::style::load_style_blocking;
use mapsnap::{CameraOptions, Error, LatLng, SessionConfig, Size, Snapshotter};
use tiny_http::{Response, Server};

/// Serve `/style.json`, `/cities.geojson` and 404 for anything else until
/// `requests` have been answered.
fn serve(requests: usize) -> String {
    let server = Server::http("0.0.0.0:0").unwrap();
    let base = format!("http://{}", server.server_addr());
    let style = format!(
        r##"{{
            "version": 8,
            "name": "Served",
            "sources": {{ "cities": {{ "type": "geojson", "data": "{}/cities.geojson" }} }},
            "layers": [
                {{ "id": "bg", "type": "background", "paint": {{ "background-color": "#000000" }} }},
                {{ "id": "dots", "type": "circle", "source": "cities",
                   "paint": {{ "circle-color": "#ff0000", "circle-radius": 6 }} }}
            ]
        }}"##,
        base
    );
    let cities = r#"{ "type": "Feature", "geometry": { "type": "Point", "coordinates": [0, 0] } }"#;

    std::thread::spawn(move || {
        for _ in 0..requests {
            let Ok(request) = server.recv() else {
                return;
            };
            let response = match request.url() {
                "/style.json" => Response::from_string(style.clone()),
                "/cities.geojson" => Response::from_string(cities),
                _ => Response::from_string("not found").with_status_code(404),
            };
            let _ = request.respond(response);
        }
    });
    base
}

#[test]
fn style_and_its_source_load_over_http() {
    let base = serve(2);
    let style = load_style_blocking(&format!("{}/style.json", base), 5000).expect("style");
    assert_eq!(style.name.as_deref(), Some("Served"));
    assert_eq!(style.layers.len(), 2);
    assert_eq!(style.sources["cities"].len(), 1);
}

#[test]
fn served_style_renders_its_circle_at_the_center() {
    let base = serve(2);
    let cfg = SessionConfig {
        style: format!("{}/style.json", base),
        size: Size::new(64, 64),
        camera: CameraOptions::default()
            .with_center(LatLng::new(0.0, 0.0))
            .with_zoom(1.0),
        ..Default::default()
    };
    let s = Snapshotter::new(cfg).unwrap();
    let snap = s.snapshot_blocking().expect("snapshot");
    assert_eq!(snap.style_name.as_deref(), Some("Served"));
    assert_eq!(snap.image.pixel(32, 32), Some([255, 0, 0, 255]));
    assert_eq!(snap.image.pixel(2, 2), Some([0, 0, 0, 255]));
}

#[test]
fn missing_style_is_a_style_load_failure() {
    let base = serve(1);
    let cfg = SessionConfig {
        style: format!("{}/missing.json", base),
        size: Size::new(16, 16),
        ..Default::default()
    };
    let s = Snapshotter::new(cfg).unwrap();
    match s.snapshot_blocking() {
        Err(Error::StyleLoadFailure(msg)) => assert!(msg.contains("404"), "{}", msg),
        other => panic!("expected StyleLoadFailure, got {:?}", other),
    }
}
