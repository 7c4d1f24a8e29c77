//! End-to-end crawl tests against a scripted browser

mod common;

use common::*;
use serial_harvest::crawler::{run_crawl, CrawlContext, Dispatcher};
use serial_harvest::state::{BulkStatus, FailureKind, TaskStatus, TaskTracker};
use serial_harvest::storage::{Storage, StoryStatus};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const POLL: Duration = Duration::from_millis(2);

async fn crawl(ctx: &serial_harvest::crawler::CrawlContext, url: &str) -> serial_harvest::CrawlTask {
    let handle = ctx.tracker.create_task(url);
    run_crawl(ctx.clone(), handle, url.to_string(), false).await
}

#[tokio::test]
async fn test_full_story_crawl() {
    let driver = ScriptedDriver::new();
    script_story(&driver, "tam-quoc", &[1, 2, 3]);
    let ctx = context(driver.clone(), 2);

    let task = crawl(&ctx, &story_url("tam-quoc")).await;

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.progress, 100);
    assert_eq!(task.total_chapters, Some(3));
    assert_eq!(task.fetched_chapters, 3);
    assert!(task.completed_at.is_some());

    let story = ctx.store.get_story_by_slug("tam-quoc").unwrap().unwrap();
    assert_eq!(story.title, "tam-quoc");
    assert_eq!(story.author, "Tác Giả");
    assert_eq!(story.genres, vec!["Tiên Hiệp".to_string()]);
    assert_eq!(story.status, StoryStatus::Ongoing);
    assert_eq!(story.total_chapters, 3);

    let chapter = ctx
        .store
        .with(|s| s.get_chapter(&story.id, 2))
        .unwrap()
        .unwrap();
    assert_eq!(chapter.title, "Chương 2: Hồi 2");
    assert_eq!(chapter.content, "Đoạn một của chương 2.\n\nĐoạn hai.");

    let stats = ctx.store.with(|s| s.daily_stats(1)).unwrap();
    assert_eq!(stats[0].stories_crawled, 1);
    assert_eq!(stats[0].chapters_crawled, 3);
    assert_eq!(stats[0].content_fetched, 3);
    assert_eq!(stats[0].errors, 0);
}

#[tokio::test]
async fn test_recrawl_fetches_no_stored_chapters() {
    let driver = ScriptedDriver::new();
    script_story(&driver, "tam-quoc", &[1, 2, 3]);
    let ctx = context(driver.clone(), 2);

    let first = crawl(&ctx, &story_url("tam-quoc")).await;
    assert_eq!(driver.chapter_calls(), 3);

    let second = crawl(&ctx, &story_url("tam-quoc")).await;

    assert_eq!(second.status, TaskStatus::Completed);
    assert_eq!(driver.chapter_calls(), 3);
    assert_eq!(second.fetched_chapters, 0);
    assert_eq!(second.skipped_chapters, 3);
    assert_eq!(second.progress, 100);
    assert_eq!(second.story_id, first.story_id);
    assert_eq!(ctx.store.with(|s| s.count_stories()).unwrap(), 1);

    // Skipped chapters are not counted again
    let stats = ctx.store.with(|s| s.daily_stats(1)).unwrap();
    assert_eq!(stats[0].stories_crawled, 2);
    assert_eq!(stats[0].chapters_crawled, 3);
    assert_eq!(stats[0].content_fetched, 3);
}

#[tokio::test]
async fn test_recrawl_fetches_only_new_chapters() {
    let driver = ScriptedDriver::new();
    script_story(&driver, "dang-ra", &[1, 2]);
    let ctx = context(driver.clone(), 2);
    crawl(&ctx, &story_url("dang-ra")).await;

    script_story(&driver, "dang-ra", &[1, 2, 3, 4]);
    let task = crawl(&ctx, &story_url("dang-ra")).await;

    assert_eq!(task.fetched_chapters, 2);
    assert_eq!(task.skipped_chapters, 2);
    assert_eq!(driver.calls(&chapter_url("dang-ra", 1)), 1);
    assert_eq!(driver.calls(&chapter_url("dang-ra", 4)), 1);
    let story = ctx.store.get_story_by_slug("dang-ra").unwrap().unwrap();
    assert_eq!(story.total_chapters, 4);
}

#[tokio::test]
async fn test_force_refresh_refetches_stored_chapters() {
    let driver = ScriptedDriver::new();
    script_story(&driver, "lam-lai", &[1, 2]);
    let ctx = context(driver.clone(), 1);
    crawl(&ctx, &story_url("lam-lai")).await;

    let url = story_url("lam-lai");
    let handle = ctx.tracker.create_task(&url);
    let task = run_crawl(ctx.clone(), handle, url, true).await;

    assert_eq!(task.fetched_chapters, 2);
    assert_eq!(driver.chapter_calls(), 4);
    let story = ctx.store.get_story_by_slug("lam-lai").unwrap().unwrap();
    assert_eq!(ctx.store.with(|s| s.count_chapters(&story.id)).unwrap(), 2);
}

#[tokio::test]
async fn test_missing_cover_still_yields_story() {
    let driver = ScriptedDriver::new();
    script_story(&driver, "khong-bia", &[1]);
    let ctx = context(driver, 1);

    let task = crawl(&ctx, &story_url("khong-bia")).await;

    assert_eq!(task.status, TaskStatus::Completed);
    let story = ctx.store.get_story_by_slug("khong-bia").unwrap().unwrap();
    assert_eq!(story.cover_url, "");
}

#[tokio::test]
async fn test_missing_title_fails_task_as_fatal() {
    let driver = ScriptedDriver::new();
    driver.page(
        &story_url("vo-danh"),
        r#"<html><head><title>Trang</title></head><body>
        <ul class="list-chapter"><li><a href="/vo-danh/chuong-1/">Chương 1</a></li></ul>
        </body></html>"#,
    );
    let ctx = context(driver.clone(), 1);

    let task = crawl(&ctx, &story_url("vo-danh")).await;

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error.as_ref().unwrap().kind, FailureKind::Fatal);
    assert!(task.story_id.is_none());
    assert!(ctx.store.get_story_by_slug("vo-danh").unwrap().is_none());
    assert_eq!(driver.chapter_calls(), 0);
}

#[tokio::test]
async fn test_chapter_exhausting_retries_does_not_fail_task() {
    let driver = ScriptedDriver::new();
    script_story(&driver, "ba-chuong", &[1, 2, 3]);
    let broken = chapter_url("ba-chuong", 2);
    driver.fail(&broken, transient(&broken), 10);
    let ctx = context(driver.clone(), 2);

    let task = crawl(&ctx, &story_url("ba-chuong")).await;

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.total_chapters, Some(3));
    assert_eq!(task.fetched_chapters, 2);
    assert_eq!(task.failed_chapters.len(), 1);
    assert_eq!(task.failed_chapters[0].chapter_number, 2);
    assert_eq!(task.failed_chapters[0].kind, FailureKind::Transient);
    assert_eq!(driver.calls(&broken), 3);

    let story = ctx.store.get_story_by_slug("ba-chuong").unwrap().unwrap();
    assert_eq!(story.total_chapters, 3);
    assert!(ctx.store.chapter_exists(&story.id, 1).unwrap());
    assert!(!ctx.store.chapter_exists(&story.id, 2).unwrap());
    assert!(ctx.store.chapter_exists(&story.id, 3).unwrap());

    let stats = ctx.store.with(|s| s.daily_stats(1)).unwrap();
    assert_eq!(stats[0].errors, 1);
}

#[tokio::test]
async fn test_transient_failure_recovers_on_retry() {
    let driver = ScriptedDriver::new();
    script_story(&driver, "lai-duoc", &[1]);
    let flaky = chapter_url("lai-duoc", 1);
    driver.fail(&flaky, transient(&flaky), 2);
    let ctx = context(driver.clone(), 1);

    let task = crawl(&ctx, &story_url("lai-duoc")).await;

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.fetched_chapters, 1);
    assert!(task.failed_chapters.is_empty());
    assert_eq!(driver.calls(&flaky), 3);
}

#[tokio::test]
async fn test_missing_chapter_page_is_not_retried() {
    let driver = ScriptedDriver::new();
    driver.page(&story_url("thieu"), story_page("thieu", "Thiếu", &[1, 2], 1));
    driver.page(&chapter_url("thieu", 1), chapter_page(1));
    let ctx = context(driver.clone(), 1);

    let task = crawl(&ctx, &story_url("thieu")).await;

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.failed_chapters[0].kind, FailureKind::NotFound);
    assert_eq!(driver.calls(&chapter_url("thieu", 2)), 1);
}

#[tokio::test]
async fn test_progress_never_decreases() {
    let driver = ScriptedDriver::new();
    script_story(&driver, "tien-do", &[1, 2, 3, 4, 5, 6, 7]);
    let broken = chapter_url("tien-do", 4);
    driver.fail(&broken, transient(&broken), 10);
    let ctx = context(driver.clone(), 1);

    let url = story_url("tien-do");
    let handle = ctx.tracker.create_task(&url);
    let id = handle.id().to_string();

    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = Arc::clone(&seen);
        let tracker = Arc::clone(&ctx.tracker);
        driver.on_render(move |_| {
            if let Ok(task) = tracker.get_task(&id) {
                seen.lock().unwrap().push(task.progress);
            }
        });
    }

    let task = run_crawl(ctx.clone(), handle, url, false).await;
    let mut seen = seen.lock().unwrap().clone();
    seen.push(task.progress);

    assert!(seen.len() > 7);
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {:?}", seen);
    assert_eq!(*seen.last().unwrap(), 100);
}

#[tokio::test]
async fn test_blocked_page_cools_down_then_resumes() {
    let driver = ScriptedDriver::new();
    script_story(&driver, "bi-chan", &[1, 2]);
    let gated = chapter_url("bi-chan", 1);
    driver.fail(&gated, blocked(&gated), 1);
    let ctx = context(driver.clone(), 1);

    let task = crawl(&ctx, &story_url("bi-chan")).await;

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.fetched_chapters, 2);
    assert_eq!(driver.calls(&gated), 2);
}

#[tokio::test]
async fn test_exhausted_cooldowns_fail_task_as_blocked() {
    let driver = ScriptedDriver::new();
    script_story(&driver, "chan-han", &[1, 2, 3]);
    let gated = chapter_url("chan-han", 2);
    driver.fail(&gated, blocked(&gated), 5);
    let ctx = context(driver.clone(), 1);

    let task = crawl(&ctx, &story_url("chan-han")).await;

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error.as_ref().unwrap().kind, FailureKind::Blocked);
    // One cooldown allowed, so two renders of the gated page
    assert_eq!(driver.calls(&gated), 2);
    assert_eq!(driver.calls(&chapter_url("chan-han", 3)), 0);
    assert_eq!(task.fetched_chapters, 1);
}

#[tokio::test]
async fn test_cancel_stops_before_next_chapter() {
    let driver = ScriptedDriver::new();
    let chapters: Vec<u32> = (1..=10).collect();
    script_story(&driver, "dung-lai", &chapters);
    let ctx = context(driver.clone(), 1);

    let url = story_url("dung-lai");
    let handle = ctx.tracker.create_task(&url);
    let id = handle.id().to_string();
    {
        let tracker = Arc::clone(&ctx.tracker);
        let trigger = chapter_url("dung-lai", 2);
        let id = id.clone();
        driver.on_render(move |rendered| {
            if rendered == trigger {
                tracker.cancel(&id).unwrap();
            }
        });
    }

    let task = run_crawl(ctx.clone(), handle, url, false).await;

    assert_eq!(task.status, TaskStatus::Failed);
    let error = task.error.as_ref().unwrap();
    assert_eq!(error.kind, FailureKind::Cancelled);
    assert_eq!(error.reason, "Cancelled");
    // The in-flight fetch finishes; nothing after it starts
    assert_eq!(driver.chapter_calls(), 2);
    assert_eq!(task.fetched_chapters, 2);
    assert!(!ctx.tracker.cancel(&id).unwrap());
}

#[tokio::test]
async fn test_paginated_chapter_index() {
    let driver = ScriptedDriver::new();
    let slug = "nhieu-trang";
    driver.page(&story_url(slug), story_page(slug, "Nhiều Trang", &[1, 2], 3));
    driver.page(&format!("{}trang-2/", story_url(slug)), index_page(slug, &[3, 4]));
    // Page 3 is missing; the index is used as far as it goes
    for n in 1..=4 {
        driver.page(&chapter_url(slug, n), chapter_page(n));
    }
    let ctx = context(driver.clone(), 2);

    let task = crawl(&ctx, &story_url(slug)).await;

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.total_chapters, Some(4));
    assert_eq!(task.fetched_chapters, 4);
    assert_eq!(driver.calls(&format!("{}trang-3/", story_url(slug))), 1);
}

#[tokio::test]
async fn test_later_duplicate_wins_and_chapters_run_in_order() {
    let driver = ScriptedDriver::new();
    let slug = "lap-lai";
    let revised = format!("{}/{}/chuong-2-sua/", HOST, slug);
    driver.page(
        &story_url(slug),
        format!(
            r#"<html><head><title>Lặp Lại</title></head><body>
            <h3 class="title">Lặp Lại</h3>
            <ul class="list-chapter">
              <li><a href="/{slug}/chuong-3/">Chương 3</a></li>
              <li><a href="/{slug}/chuong-1/">Chương 1</a></li>
              <li><a href="/{slug}/chuong-2/">Chương 2</a></li>
              <li><a href="/{slug}/chuong-2-sua/">Chương 2: Bản sửa</a></li>
            </ul></body></html>"#
        ),
    );
    for n in 1..=3 {
        driver.page(&chapter_url(slug, n), chapter_page(n));
    }
    driver.page(
        &revised,
        r#"<html><head><title>Chương 2</title></head><body>
        <a class="chapter-title">Chương 2: Bản sửa</a>
        <div id="chapter-c"><p>Bản sửa của chương 2.</p></div></body></html>"#,
    );

    let rendered = Arc::new(Mutex::new(Vec::new()));
    {
        let rendered = Arc::clone(&rendered);
        driver.on_render(move |url| {
            if url.contains("/chuong-") {
                rendered.lock().unwrap().push(url.to_string());
            }
        });
    }
    let ctx = context(driver.clone(), 2);

    let task = crawl(&ctx, &story_url(slug)).await;

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.total_chapters, Some(3));
    assert_eq!(
        *rendered.lock().unwrap(),
        vec![chapter_url(slug, 1), revised.clone(), chapter_url(slug, 3)]
    );
    assert_eq!(driver.calls(&chapter_url(slug, 2)), 0);

    let story = ctx.store.get_story_by_slug(slug).unwrap().unwrap();
    let chapter = ctx
        .store
        .with(|s| s.get_chapter(&story.id, 2))
        .unwrap()
        .unwrap();
    assert_eq!(chapter.content, "Bản sửa của chương 2.");
    assert_eq!(chapter.source_url, revised);
}

#[tokio::test]
async fn test_index_without_links_fails_and_keeps_known_total() {
    let driver = ScriptedDriver::new();
    script_story(&driver, "doi-giao-dien", &[1, 2, 3]);
    let ctx = context(driver.clone(), 2);

    let first = crawl(&ctx, &story_url("doi-giao-dien")).await;
    assert_eq!(first.status, TaskStatus::Completed);

    // The site changed its markup and the chapter list is gone
    driver.page(
        &story_url("doi-giao-dien"),
        r#"<html><head><title>Đổi Giao Diện</title></head><body>
        <h3 class="title">Đổi Giao Diện</h3><div class="new-chapter-list"></div></body></html>"#,
    );
    let second = crawl(&ctx, &story_url("doi-giao-dien")).await;

    assert_eq!(second.status, TaskStatus::Failed);
    assert_eq!(second.error.as_ref().unwrap().kind, FailureKind::Parse);
    let story = ctx.store.get_story_by_slug("doi-giao-dien").unwrap().unwrap();
    assert_eq!(story.total_chapters, 3);
}

#[tokio::test]
async fn test_submit_and_poll() {
    let driver = ScriptedDriver::new();
    script_story(&driver, "hoi-tham", &[1, 2]);
    let dispatcher = Dispatcher::new(context(driver, 2), 2, BTreeMap::new());

    let id = dispatcher.submit_crawl(&story_url("hoi-tham"));
    let task = dispatcher.wait_for_task(&id, POLL).await.unwrap();

    assert_eq!(task.id, id);
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.fetched_chapters, 2);
}

fn bulk_dispatcher(driver: Arc<ScriptedDriver>, max_contexts: usize, workers: usize) -> Dispatcher {
    let mut categories = BTreeMap::new();
    categories.insert(
        "moi".to_string(),
        format!("{}/danh-sach/truyen-moi/", HOST),
    );
    categories.insert(
        "hot".to_string(),
        format!("{}/danh-sach/truyen-hot/", HOST),
    );
    Dispatcher::new(context(driver, max_contexts), workers, categories)
}

#[tokio::test]
async fn test_bulk_skips_stored_stories_and_duplicates() {
    let driver = ScriptedDriver::new();
    for slug in ["da-co", "moi-mot", "moi-hai", "hong"] {
        script_story(&driver, slug, &[1, 2]);
    }
    let listing = format!("{}/danh-sach/truyen-moi/", HOST);
    driver.page(&listing, listing_page(&["da-co", "moi-mot", "hong"], 2));
    driver.page(
        &format!("{}trang-2/", listing),
        listing_page(&["moi-mot", "moi-hai"], 2),
    );

    let dispatcher = bulk_dispatcher(driver.clone(), 2, 4);
    let ctx = dispatcher.context().clone();

    // A finished story and one whose last crawl failed midway
    crawl(&ctx, &story_url("da-co")).await;
    let gated = chapter_url("hong", 1);
    driver.fail(&gated, blocked(&gated), 2);
    let failed = crawl(&ctx, &story_url("hong")).await;
    assert_eq!(failed.status, TaskStatus::Failed);

    let bulk_id = dispatcher
        .submit_bulk_crawl(&["moi".to_string()], 5)
        .unwrap();
    let bulk = dispatcher.wait_for_bulk(&bulk_id, POLL).await.unwrap();

    assert_eq!(bulk.status, BulkStatus::Completed);
    assert_eq!(bulk.progress, 100);
    assert_eq!(bulk.discovered, 4);
    assert_eq!(bulk.skipped, 1);
    assert_eq!(bulk.child_task_ids.len(), 3);
    assert_eq!(bulk.failed, 0);
    assert_eq!(driver.calls(&story_url("da-co")), 1);
    assert_eq!(driver.calls(&story_url("moi-mot")), 1);
    assert_eq!(driver.calls(&story_url("hong")), 2);
    // total-page says 2, so page 3 is never requested
    assert_eq!(driver.calls(&format!("{}trang-3/", listing)), 0);

    for child in &bulk.child_task_ids {
        let task = dispatcher.get_task_status(child).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
    }
}

#[tokio::test]
async fn test_bulk_recrawls_story_that_failed_before_restart() {
    let driver = ScriptedDriver::new();
    script_story(&driver, "hong", &[1, 2]);
    let listing = format!("{}/danh-sach/truyen-moi/", HOST);
    driver.page(&listing, listing_page(&["hong"], 1));

    let first_run = bulk_dispatcher(driver.clone(), 2, 2);
    let ctx = first_run.context().clone();
    let gated = chapter_url("hong", 1);
    driver.fail(&gated, blocked(&gated), 2);
    // Submitted without the trailing slash the listing uses
    let failed = crawl(&ctx, &format!("{}/hong", HOST)).await;
    assert_eq!(failed.status, TaskStatus::Failed);
    assert!(ctx.store.get_story_by_slug("hong").unwrap().is_some());

    // Same database, fresh in-memory state
    let restarted = CrawlContext {
        tracker: Arc::new(TaskTracker::new(ctx.store.clone())),
        ..ctx
    };
    let mut categories = BTreeMap::new();
    categories.insert("moi".to_string(), listing);
    let dispatcher = Dispatcher::new(restarted, 2, categories);

    let bulk_id = dispatcher
        .submit_bulk_crawl(&["moi".to_string()], 1)
        .unwrap();
    let bulk = dispatcher.wait_for_bulk(&bulk_id, POLL).await.unwrap();

    assert_eq!(bulk.discovered, 1);
    assert_eq!(bulk.skipped, 0);
    assert_eq!(bulk.child_task_ids.len(), 1);
    let child = dispatcher.get_task_status(&bulk.child_task_ids[0]).unwrap();
    assert_eq!(child.status, TaskStatus::Completed);
    assert_eq!(child.fetched_chapters, 2);
}

#[tokio::test]
async fn test_cancelled_bulk_stops_enumerating_and_cancels_children() {
    let driver = ScriptedDriver::new();
    let listing = format!("{}/danh-sach/truyen-moi/", HOST);
    let second_page = format!("{}trang-2/", listing);
    driver.page(&listing, listing_page(&["mot"], 3));
    driver.page(&second_page, listing_page(&["hai"], 3));
    driver.page(&format!("{}trang-3/", listing), listing_page(&["ba"], 3));
    for slug in ["mot", "hai", "ba"] {
        script_story(&driver, slug, &[1]);
    }

    let dispatcher = bulk_dispatcher(driver.clone(), 1, 2);
    let bulk_slot: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    {
        let tracker = Arc::clone(dispatcher.tracker());
        let bulk_slot = Arc::clone(&bulk_slot);
        let trigger = second_page.clone();
        driver.on_render(move |url| {
            if url == trigger {
                if let Some(id) = bulk_slot.lock().unwrap().as_deref() {
                    tracker.cancel_bulk(id).unwrap();
                }
            }
        });
    }

    let bulk_id = dispatcher
        .submit_bulk_crawl(&["moi".to_string()], 3)
        .unwrap();
    *bulk_slot.lock().unwrap() = Some(bulk_id.clone());
    let bulk = dispatcher.wait_for_bulk(&bulk_id, POLL).await.unwrap();

    assert_eq!(bulk.status, BulkStatus::Completed);
    assert!(bulk.cancel_requested);
    assert_eq!(driver.calls(&format!("{}trang-3/", listing)), 0);
    assert_eq!(driver.calls(&story_url("ba")), 0);

    // Found on the page that was in flight; stopped before it started
    assert_eq!(driver.calls(&story_url("hai")), 0);
    let last = bulk.child_task_ids.last().unwrap();
    let child = dispatcher.get_task_status(last).unwrap();
    assert_eq!(child.status, TaskStatus::Failed);
    assert_eq!(child.error.unwrap().kind, FailureKind::Cancelled);
}

#[tokio::test]
async fn test_bulk_respects_page_limit() {
    let driver = ScriptedDriver::new();
    let listing = format!("{}/danh-sach/truyen-hot/", HOST);
    driver.page(&listing, listing_page(&["mot"], 4));
    driver.page(&format!("{}trang-2/", listing), listing_page(&["hai"], 4));
    for slug in ["mot", "hai"] {
        script_story(&driver, slug, &[1]);
    }
    let dispatcher = bulk_dispatcher(driver.clone(), 1, 1);

    let bulk_id = dispatcher
        .submit_bulk_crawl(&["hot".to_string()], 1)
        .unwrap();
    let bulk = dispatcher.wait_for_bulk(&bulk_id, POLL).await.unwrap();

    assert_eq!(bulk.child_task_ids.len(), 1);
    assert_eq!(driver.calls(&format!("{}trang-2/", listing)), 0);
    assert_eq!(driver.calls(&story_url("hai")), 0);
}

#[tokio::test]
async fn test_fetches_in_flight_never_exceed_pool() {
    let driver = ScriptedDriver::new();
    driver.set_delay(Duration::from_millis(3));

    let hot: Vec<String> = (1..=4).map(|i| format!("hot-{}", i)).collect();
    let new: Vec<String> = (1..=4).map(|i| format!("moi-{}", i)).collect();
    for slug in hot.iter().chain(new.iter()) {
        script_story(&driver, slug, &[1, 2, 3]);
    }
    let hot_refs: Vec<&str> = hot.iter().map(String::as_str).collect();
    let new_refs: Vec<&str> = new.iter().map(String::as_str).collect();
    driver.page(
        &format!("{}/danh-sach/truyen-hot/", HOST),
        listing_page(&hot_refs, 1),
    );
    driver.page(
        &format!("{}/danh-sach/truyen-moi/", HOST),
        listing_page(&new_refs, 1),
    );

    let pool = 2;
    let dispatcher = bulk_dispatcher(driver.clone(), pool, 8);

    let first = dispatcher
        .submit_bulk_crawl(&["hot".to_string()], 1)
        .unwrap();
    let second = dispatcher
        .submit_bulk_crawl(&["moi".to_string()], 1)
        .unwrap();
    let third = dispatcher
        .submit_bulk_crawl(&["hot".to_string(), "moi".to_string()], 1)
        .unwrap();

    for id in [&first, &second, &third] {
        let bulk = dispatcher.wait_for_bulk(id, POLL).await.unwrap();
        assert_eq!(bulk.status, BulkStatus::Completed);
    }

    assert!(driver.max_in_flight() <= pool);
    assert!(driver.max_in_flight() >= 1);
    for slug in hot.iter().chain(new.iter()) {
        let story = dispatcher
            .context()
            .store
            .get_story_by_slug(slug)
            .unwrap()
            .unwrap();
        assert_eq!(
            dispatcher
                .context()
                .store
                .with(|s| s.count_chapters(&story.id))
                .unwrap(),
            3
        );
    }
}
