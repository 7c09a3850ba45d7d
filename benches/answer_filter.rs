use criterion::{black_box, criterion_group, criterion_main, Criterion};

use tutor_relay::relay::{extract_answer, AnswerFilter, DeltaDecoder};
use tutor_relay::stream::SseLineParser;

fn sample_reply() -> String {
    let mut reply = String::from("<think>");
    reply.push_str(&"The student is asking about fractions, keep it simple. ".repeat(20));
    reply.push_str("</think><answer>");
    reply.push_str(&"A fraction like <b>3/4</b> means 3 parts out of 4 < 5 parts. ".repeat(20));
    reply.push_str("</answer>");
    reply
}

fn small_chunks(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(size)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

fn bench_answer_filter(c: &mut Criterion) {
    let reply = sample_reply();
    let chunks = small_chunks(&reply, 4);

    c.bench_function("answer_filter_4_char_deltas", |b| {
        b.iter(|| {
            let mut filter = AnswerFilter::new();
            for chunk in &chunks {
                black_box(filter.push(black_box(chunk)));
            }
            black_box(filter.finish());
        });
    });

    c.bench_function("answer_filter_single_delta", |b| {
        b.iter(|| {
            let mut filter = AnswerFilter::new();
            black_box(filter.push(black_box(&reply)));
            black_box(filter.finish());
        });
    });

    c.bench_function("extract_answer_full_reply", |b| {
        b.iter(|| black_box(extract_answer(black_box(&reply))));
    });
}

fn bench_sse_decode(c: &mut Criterion) {
    let reply = sample_reply();
    let mut wire = String::new();
    for chunk in small_chunks(&reply, 4) {
        let payload = serde_json::json!({ "choices": [{ "delta": { "content": chunk } }] });
        wire.push_str(&format!("data: {payload}\n\n"));
    }
    let wire_chunks = small_chunks(&wire, 512);
    let decoder = DeltaDecoder::default();

    c.bench_function("sse_decode_and_filter", |b| {
        b.iter(|| {
            let mut parser = SseLineParser::new();
            let mut filter = AnswerFilter::new();
            let mut payloads = Vec::new();
            for chunk in &wire_chunks {
                parser.feed_into(black_box(chunk), &mut payloads);
                for payload in payloads.drain(..) {
                    if let Ok(Some(delta)) = decoder.decode(&payload) {
                        black_box(filter.push(&delta));
                    }
                }
            }
            black_box(filter.finish());
        });
    });
}

criterion_group!(benches, bench_answer_filter, bench_sse_decode);
criterion_main!(benches);
