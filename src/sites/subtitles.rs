use crate::core::error::ResolveResult;
use crate::core::fetch::{fetch_json, Fetch, FetchRequest};
use crate::core::model::{SubtitleMap, SubtitleTrack};
use serde::Deserialize;

#[derive(Deserialize)]
struct Manifest {
    page: Page,
}

#[derive(Deserialize)]
struct Page {
    items: Vec<Entry>,
}

#[derive(Deserialize)]
struct Entry {
    lang: String,
    src: String,
}

/// Build a language -> tracks mapping from a subtitle manifest reference.
/// The manifest proper lives at the reference URL with `.json` appended.
pub async fn fetch_subtitles(fetch: &dyn Fetch, manifest_url: &str) -> ResolveResult<SubtitleMap> {
    let manifest: Manifest = fetch_json(
        fetch,
        FetchRequest::get(format!("{manifest_url}.json")).note("downloading subtitles info"),
    )
    .await?;

    let mut map = SubtitleMap::new();
    for entry in manifest.page.items {
        map.entry(entry.lang).or_insert_with(Vec::new).push(SubtitleTrack {
            ext: "vtt".into(),
            url: entry.src,
        });
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fetch::mock::MockFetch;

    #[tokio::test]
    async fn groups_tracks_by_language() {
        let fetch = MockFetch::new().route(
            "/subs/888631.json",
            r#"{"page":{"items":[
                {"lang":"es","src":"http://cdn/888631_es.vtt"},
                {"lang":"en","src":"http://cdn/888631_en.vtt"}
            ]}}"#,
        );
        let subs = fetch_subtitles(&fetch, "http://cdn/subs/888631").await.unwrap();
        assert_eq!(subs.len(), 2);
        assert_eq!(subs["es"][0].url, "http://cdn/888631_es.vtt");
        assert_eq!(subs["en"][0].ext, "vtt");
    }
}
