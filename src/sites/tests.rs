//! End-to-end resolution scenarios against canned endpoints: every fetch
//! goes through `MockFetch`, and the qq token exchange talks to a loopback
//! TCP server.

use crate::core::cipher::CipherCodec;
use crate::core::error::ResolveError;
use crate::core::fetch::mock::MockFetch;
use crate::core::model::ResolvedMedia;
use crate::sites::qq::resolver::{QqConfig, QqResolver};
use crate::sites::rtve::resolver::{RtveLiveResolver, RtveResolver};
use crate::sites::{ResolveContext, SiteResolver};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

fn ztnr_body(xml: &str) -> String {
    CipherCodec::ecb(b"yeL&daD3").encrypt(xml, false)
}

#[tokio::test]
async fn rtve_resolves_one_on_demand_video() {
    let fetch = MockFetch::new()
        .route(
            "/api/videos/888631/config/alacarta_videos.json",
            r#"{"page":{"items":[{"title":"X","duration":1561680}]}}"#,
        )
        .route(
            "ztnr.rtve.es/ztnr/res/",
            &ztnr_body(
                "<ztnr><preset><response code=\"ok\">\
                 <url>http://media.net.rtve/resources/ciudadk.mp4</url>\
                 </response></preset></ztnr>",
            ),
        )
        .route("auth/resources/ciudadk.mp4", "resources/mp4/ciudadk.mp4");

    let resolver = RtveResolver::alacarta();
    let ctx = ResolveContext { fetch: &fetch };
    let media = resolver
        .resolve("http://www.rtve.es/alacarta/videos/ciudad-k/ciudad-20100927-2131/888631/", &ctx)
        .await
        .unwrap();

    let item = match media {
        ResolvedMedia::Single(item) => item,
        other => panic!("expected a single item, got {other:?}"),
    };
    assert_eq!(item.id, "888631");
    assert_eq!(item.title, "X");
    assert!((item.duration_seconds.unwrap() - 1561.68).abs() < 1e-9);
    assert_eq!(item.formats.len(), 1);
    assert_eq!(item.formats[0].url, "http://mvod1.akcdn.rtve.es/resources/mp4/ciudadk.mp4");

    // The authenticated rewrite hit the multimedia CDN host.
    let requests = fetch.requests.lock().unwrap();
    assert!(requests
        .iter()
        .any(|u| u == "http://media.multimedia.cdn.rtve/auth/resources/ciudadk.mp4"));
}

#[tokio::test]
async fn rtve_non_ok_status_is_an_expected_failure() {
    let fetch = MockFetch::new()
        .route(
            "/api/videos/888631/config/alacarta_videos.json",
            r#"{"page":{"items":[{"title":"X","duration":1561680}]}}"#,
        )
        .route(
            "ztnr.rtve.es/ztnr/res/",
            &ztnr_body("<ztnr><preset><response code=\"error28\"/></preset></ztnr>"),
        );

    let resolver = RtveResolver::alacarta();
    let ctx = ResolveContext { fetch: &fetch };
    let err = resolver
        .resolve("http://www.rtve.es/alacarta/videos/ciudad-k/ciudad-20100927-2131/888631/", &ctx)
        .await
        .unwrap_err();
    assert!(err.is_expected(), "wanted Unavailable, got {err:?}");
    assert_eq!(err.to_string(), "error28");
}

#[tokio::test]
async fn rtve_falls_back_to_the_next_candidate_and_keeps_subtitles() {
    let fetch = MockFetch::new()
        .route(
            "/api/videos/888631/config/alacarta_videos.json",
            r#"{"page":{"items":[{"title":"X","duration":1561680,
                "sbtFile":"http://cdn/subs/888631"}]}}"#,
        )
        .route(
            "ztnr.rtve.es/ztnr/res/",
            &ztnr_body(
                "<ztnr><preset><response code=\"ok\">\
                 <url>http://dead.net.rtve/resources/first.mp4</url>\
                 <url>http://live.net.rtve/resources/second.mp4</url>\
                 </response></preset></ztnr>",
            ),
        )
        .route_error("auth/resources/first.mp4", "connection refused")
        .route("auth/resources/second.mp4", "resources/mp4/second.mp4")
        .route(
            "/subs/888631.json",
            r#"{"page":{"items":[{"lang":"es","src":"http://cdn/888631_es.vtt"}]}}"#,
        );

    let resolver = RtveResolver::alacarta();
    let ctx = ResolveContext { fetch: &fetch };
    let media = resolver
        .resolve("http://www.rtve.es/alacarta/videos/ciudad-k/ciudad-20100927-2131/888631/", &ctx)
        .await
        .unwrap();

    let item = match media {
        ResolvedMedia::Single(item) => item,
        other => panic!("expected a single item, got {other:?}"),
    };
    assert_eq!(item.formats[0].url, "http://mvod1.akcdn.rtve.es/resources/mp4/second.mp4");
    assert_eq!(item.subtitles.unwrap()["es"][0].url, "http://cdn/888631_es.vtt");
}

#[tokio::test]
async fn rtve_manifest_candidate_short_circuits_the_rewrite() {
    let fetch = MockFetch::new()
        .route(
            "/api/videos/888631/config/alacarta_videos.json",
            r#"{"page":{"items":[{"title":"X"}]}}"#,
        )
        .route(
            "ztnr.rtve.es/ztnr/res/",
            &ztnr_body(
                "<ztnr><preset><response code=\"ok\">\
                 <url>http://manifest.rtve.es/live/24h.f4m</url>\
                 <url>http://media.net.rtve/resources/ciudadk.mp4</url>\
                 </response></preset></ztnr>",
            ),
        );

    let resolver = RtveResolver::alacarta();
    let ctx = ResolveContext { fetch: &fetch };
    let media = resolver
        .resolve("http://www.rtve.es/alacarta/videos/television/24h-live/888631/", &ctx)
        .await
        .unwrap();

    match media {
        ResolvedMedia::Single(item) => {
            assert_eq!(item.formats[0].url, "http://manifest.rtve.es/live/24h.f4m");
        }
        other => panic!("expected a single item, got {other:?}"),
    }
    let requests = fetch.requests.lock().unwrap();
    assert!(
        !requests.iter().any(|u| u.contains("auth/")),
        "manifest candidates must skip the auth rewrite"
    );
}

#[tokio::test]
async fn rtve_live_title_carries_a_capture_timestamp() {
    let page = r#"<html><head>
        <meta property="og:title" content="Estoy viendo La 1 en directo en RTVE.es en directo"/>
        </head><body>
        <param name="movie" value="http://www.rtve.es/swf/player.swf"/>
        <embed src="x?assetID=1694255_es_videos&location=alacarta&"/>
        </body></html>"#;
    let fetch = MockFetch::new()
        .route("rtve.es/noticias/directo-la-1", page)
        .route(
            "ztnr.rtve.es/ztnr/res/",
            &ztnr_body(
                "<ztnr><preset><response code=\"ok\">\
                 <url>rtmp://live.rtve.es/stream/la1</url>\
                 </response></preset></ztnr>",
            ),
        );

    let resolver = RtveLiveResolver::new();
    let ctx = ResolveContext { fetch: &fetch };
    let media = resolver
        .resolve("http://www.rtve.es/noticias/directo-la-1/", &ctx)
        .await
        .unwrap();

    // The declared fixture's regex pins the exact title shape.
    let case = &resolver.test_cases()[0];
    assert_eq!(case.check(&media), Vec::<String>::new());
    match media {
        ResolvedMedia::Single(item) => {
            assert_eq!(item.formats[0].url, "rtmp://live.rtve.es/stream/la1");
            assert_eq!(item.player_url.as_deref(), Some("http://www.rtve.es/swf/player.swf"));
        }
        other => panic!("expected a single item, got {other:?}"),
    }
}

const QQ_KEYSTREAM: [u8; 4] = [96, 71, 147, 86];

async fn spawn_token_server(raw_token: &'static str) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 64];
        let _ = sock.read(&mut buf).await.unwrap();
        let body: Vec<u8> = raw_token
            .bytes()
            .enumerate()
            .map(|(i, b)| b ^ QQ_KEYSTREAM[i % 4])
            .collect();
        let mut frame = (body.len() as u16).to_le_bytes().to_vec();
        frame.extend(body);
        sock.write_all(&frame).await.unwrap();
    });
    port
}

#[tokio::test]
async fn qq_resolves_two_segments_by_three_tiers() {
    let token_port = spawn_token_server("RTOKEN").await;

    let vinfo = "<root>\
        <vl><vi>\
            <lnk>lnk0</lnk>\
            <cl><ci><idx>1</idx></ci><ci><idx>2</idx></ci></cl>\
            <ul><ui><url>http://video.store.qq.com/</url></ui></ul>\
        </vi></vl>\
        <fl>\
            <fi><id>10209</id><name>shd</name><cname>超清</cname></fi>\
            <fi><id>10212</id><name>hd</name><cname>高清</cname></fi>\
            <fi><id>10203</id><name>sd</name><cname>标清</cname></fi>\
        </fl>\
    </root>";
    let vclip = "<root><vi><fn>y01647bfni0.mp4</fn><key>VKEY</key><br>206</br>\
                 <fmt>shd</fmt><fs>12345</fs></vi></root>";

    let fetch = MockFetch::new()
        .route(
            "v.qq.com/x/page/y01647bfni0.html",
            r#"<script>var VIDEO_INFO = {"title":"X"};</script>"#,
        )
        .route("type=token", r#"{"result":"abcd1234"}"#)
        .route("checktime", "<result><t>1500000000</t><rand>sr</rand></result>")
        .route("type=ckey", r#"{"result":"CKEY123"}"#)
        .route("getvinfo", vinfo)
        .route("getvclip", vclip);

    let resolver = QqResolver::with_config(QqConfig {
        token_host: "127.0.0.1".into(),
        token_port,
        ..QqConfig::default()
    });
    let ctx = ResolveContext { fetch: &fetch };
    let media = resolver
        .resolve("https://v.qq.com/x/page/y01647bfni0.html", &ctx)
        .await
        .unwrap();

    let collection = match media {
        ResolvedMedia::Collection(c) => c,
        other => panic!("expected a collection, got {other:?}"),
    };
    assert_eq!(collection.id, "y01647bfni0");
    assert_eq!(collection.title, "X");
    assert_eq!(collection.entries.len(), 2);
    for (idx, entry) in collection.entries.iter().enumerate() {
        assert_eq!(entry.id, format!("y01647bfni0_{}", idx + 1));
        assert_eq!(entry.formats.len(), 3);
        for format in &entry.formats {
            assert!(format.url.starts_with("http://video.store.qq.com/y01647bfni0.mp4?"));
            assert!(format.url.contains("vkey=VKEY"));
            assert_eq!(format.bitrate, Some(206));
        }
    }
    // 1 page + 1 token + 1 checktime + 1 ckey + 1 vinfo + 2x3 vclips.
    assert_eq!(fetch.requests.lock().unwrap().len(), 11);
}

#[tokio::test]
async fn qq_single_segment_resolves_to_a_single_item() {
    let token_port = spawn_token_server("RTOKEN").await;

    let vinfo = "<root>\
        <vl><vi>\
            <lnk>lnk0</lnk>\
            <cl><ci><idx>1</idx></ci></cl>\
            <ul><ui><url>http://video.store.qq.com/</url></ui></ul>\
        </vi></vl>\
        <fl><fi><id>10209</id><name>shd</name><cname>超清</cname></fi></fl>\
    </root>";
    let vclip = "<root><vi><fn>clip.mp4</fn><key>K</key><br>100</br>\
                 <fmt>shd</fmt><fs>1</fs></vi></root>";

    let fetch = MockFetch::new()
        .route(
            "v.qq.com/x/page/y01647bfni0.html",
            r#"var VIDEO_INFO = {"title":"X"};"#,
        )
        .route("type=token", r#"{"result":"00ff"}"#)
        .route("checktime", "<result><t>1500000000</t><rand>sr</rand></result>")
        .route("type=ckey", r#"{"result":"CKEY123"}"#)
        .route("getvinfo", vinfo)
        .route("getvclip", vclip);

    let resolver = QqResolver::with_config(QqConfig {
        token_host: "127.0.0.1".into(),
        token_port,
        ..QqConfig::default()
    });
    let ctx = ResolveContext { fetch: &fetch };
    let media = resolver
        .resolve("https://v.qq.com/x/page/y01647bfni0.html", &ctx)
        .await
        .unwrap();

    match media {
        ResolvedMedia::Single(item) => {
            assert_eq!(item.id, "y01647bfni0");
            assert_eq!(item.formats.len(), 1);
        }
        other => panic!("expected a single item, got {other:?}"),
    }
}

#[tokio::test]
async fn qq_bad_token_frame_aborts_the_resolution() {
    // Server declares more bytes than it sends.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let token_port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 64];
        let _ = sock.read(&mut buf).await.unwrap();
        sock.write_all(&[9, 0, 1, 2]).await.unwrap();
    });

    let fetch = MockFetch::new()
        .route(
            "v.qq.com/x/page/y01647bfni0.html",
            r#"var VIDEO_INFO = {"title":"X"};"#,
        )
        .route("type=token", r#"{"result":"00ff"}"#);

    let resolver = QqResolver::with_config(QqConfig {
        token_host: "127.0.0.1".into(),
        token_port,
        ..QqConfig::default()
    });
    let ctx = ResolveContext { fetch: &fetch };
    let err = resolver
        .resolve("https://v.qq.com/x/page/y01647bfni0.html", &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::Protocol(_)));
}
