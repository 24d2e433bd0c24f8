use async_trait::async_trait;
use once_cell::sync::Lazy;
use percent_encoding::percent_decode_str;
use regex::Regex;
use reqwest::Client;
use url::Url;

use super::MetadataFetcher;
use crate::types::Metadata;

static RE_PLACE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^/maps/place/(?P<name>[^/]+)/@(?P<coords>[0-9.-]+,[0-9.-]+),(?P<zoom>[0-9.]+)z")
        .expect("place regex")
});

/// Recognizes Google Maps URLs and synthesizes a preview image from the
/// Static Maps API. Needs an API key to build image links; with an empty
/// key the fetcher never matches.
pub struct GoogleMapsFetcher {
    api_key: String,
}

impl GoogleMapsFetcher {
    pub fn new(api_key: impl Into<String>) -> Self {
        GoogleMapsFetcher {
            api_key: api_key.into(),
        }
    }

    fn static_map(&self, zoom: &str, markers: &str) -> Metadata {
        let mut map = Url::parse("https://maps.googleapis.com/maps/api/staticmap")
            .expect("static url");
        map.query_pairs_mut()
            .append_pair("key", &self.api_key)
            .append_pair("zoom", zoom)
            .append_pair("size", "640x480")
            .append_pair("scale", "2")
            .append_pair("markers", &format!("color:red|{markers}"));
        Metadata {
            url_type: "website".to_string(),
            image: map.to_string(),
            image_width: 640 * 2,
            image_height: 480 * 2,
            ..Metadata::default()
        }
    }
}

#[async_trait]
impl MetadataFetcher for GoogleMapsFetcher {
    async fn fetch(&self, _client: &Client, url: &Url) -> Option<Metadata> {
        if self.api_key.is_empty() || !is_maps_url(url) {
            return None;
        }
        if url.path() == "/maps/api/staticmap" {
            return Some(Metadata {
                image: url.to_string(),
                url_type: "image".to_string(),
                ..Metadata::default()
            });
        }
        // search form: /maps?q=<query>[&z=<zoom>]
        if url.path() == "/maps" {
            let query = url
                .query_pairs()
                .find(|(k, _)| k == "q")
                .map(|(_, v)| v.into_owned())
                .filter(|q| !q.is_empty())?;
            let zoom = url
                .query_pairs()
                .find(|(k, _)| k == "z")
                .map(|(_, v)| v.into_owned())
                .filter(|z| !z.is_empty())
                .unwrap_or_else(|| "16".to_string());
            return Some(self.static_map(&zoom, &query));
        }
        let decoded_path = percent_decode_str(url.path()).decode_utf8().ok()?;
        match coords_from_path(&decoded_path) {
            Some((name, coords, zoom)) => {
                let mut meta = self.static_map(&zoom, &coords);
                meta.title = name;
                Some(meta)
            }
            None => Some(Metadata {
                title: "Google Maps".to_string(),
                url_type: "website".to_string(),
                ..Metadata::default()
            }),
        }
    }
}

/// Any `*.google.*` host with a path under `/maps`.
fn is_maps_url(u: &Url) -> bool {
    let Some(host) = u.host_str() else {
        return false;
    };
    let Some(idx) = host.rfind('.') else {
        return false;
    };
    host[..idx].ends_with(".google") && u.path().starts_with("/maps")
}

/// Extracts place name, coordinates and zoom level from paths of the form
/// `/maps/place/Passeig+de+Gràcia,+Barcelona/@41.3931702,2.1617715,17z/…`.
fn coords_from_path(path: &str) -> Option<(String, String, String)> {
    let captures = RE_PLACE.captures(path)?;
    let name = captures["name"].replace('+', " ");
    Some((
        name,
        captures["coords"].to_string(),
        captures["zoom"].to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_place_coordinates() {
        let cases = [
            (
                "https://maps.google.com/maps/place/The+Manufacturing+Technology+Centre+(MTC)/@52.430763,-1.403385,16z/data=foo+bar",
                "The Manufacturing Technology Centre (MTC)",
                "52.430763,-1.403385",
                "16",
            ),
            (
                "https://www.google.com/maps/place/36%C2%B005'06.7%22N+5%C2%B030'49.6%22W/@36.0856728,-5.5169964,16z/data=",
                "36°05'06.7\"N 5°30'49.6\"W",
                "36.0856728,-5.5169964",
                "16",
            ),
        ];
        for (input, want_name, want_coords, want_zoom) in cases {
            let u = Url::parse(input).unwrap();
            let decoded = percent_decode_str(u.path()).decode_utf8().unwrap();
            let (name, coords, zoom) = coords_from_path(&decoded).unwrap();
            assert_eq!(name, want_name);
            assert_eq!(coords, want_coords);
            assert_eq!(zoom, want_zoom);
        }
    }

    #[test]
    fn host_detection_requires_google_label() {
        for (input, want) in [
            ("https://maps.google.com/maps/place/x", true),
            ("https://www.google.de/maps", true),
            ("https://google.com/maps", false),
            ("https://maps.example.com/maps", false),
            ("https://www.google.com/search?q=maps", false),
        ] {
            let u = Url::parse(input).unwrap();
            assert_eq!(is_maps_url(&u), want, "{input}");
        }
    }

    #[tokio::test]
    async fn synthesizes_static_map_previews() {
        let fetcher = GoogleMapsFetcher::new("test-key");
        let client = Client::new();

        let u = Url::parse(
            "https://maps.google.com/maps/place/Somewhere/@52.4,-1.4,15z/data=x",
        )
        .unwrap();
        let meta = fetcher.fetch(&client, &u).await.unwrap();
        assert_eq!(meta.title, "Somewhere");
        assert_eq!(meta.url_type, "website");
        assert!(meta.image.starts_with("https://maps.googleapis.com/maps/api/staticmap?"));
        assert!(meta.image.contains("key=test-key"));
        assert!(meta.image.contains("zoom=15"));
        assert_eq!((meta.image_width, meta.image_height), (1280, 960));

        // already a static map: pass through as an image
        let u = Url::parse("https://www.google.com/maps/api/staticmap?center=1,2").unwrap();
        let meta = fetcher.fetch(&client, &u).await.unwrap();
        assert_eq!(meta.url_type, "image");
        assert_eq!(meta.image, u.to_string());

        // search form
        let u = Url::parse("https://www.google.com/maps?q=Barcelona&z=12").unwrap();
        let meta = fetcher.fetch(&client, &u).await.unwrap();
        assert!(meta.image.contains("zoom=12"));
        assert!(meta.image.contains("markers=color%3Ared%7CBarcelona"));

        // no key, no match
        let silent = GoogleMapsFetcher::new("");
        assert!(silent.fetch(&client, &u).await.is_none());
    }
}
