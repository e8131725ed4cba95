extern crate refremap;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use refremap::{
    baml::{BamlDocument, BamlRecord, BamlRecordType},
    metadata::resources::{ResourceEntry, ResourceSet},
    remap::markup::MarkupRemapper,
};
use std::{collections::BTreeSet, hint::black_box};

/// A page with `count` styled elements, each carrying a pack path and a keyed resource.
fn synthetic_page(count: usize) -> BamlDocument {
    let mut records = vec![
        BamlRecord::Raw {
            record_type: BamlRecordType::DocumentStart,
            data: vec![0; 6],
        },
        BamlRecord::AssemblyInfo {
            assembly_id: 1,
            assembly_full_name: "SourceLib, Version=1.0.0.0, Culture=neutral, PublicKeyToken=null"
                .to_string(),
        },
        BamlRecord::XmlnsProperty {
            prefix: "src".to_string(),
            xml_namespace: "clr-namespace:SourceLib.Controls;assembly=SourceLib".to_string(),
            assembly_ids: vec![1],
        },
    ];

    for index in 0..count {
        let start = records.len();
        records.push(BamlRecord::DefAttributeKeyString {
            value_id: index as u16,
            target: start + 1,
            shared: true,
            shared_set: false,
        });
        records.push(BamlRecord::Raw {
            record_type: BamlRecordType::ElementStart,
            data: vec![1, 0, 0],
        });
        records.push(BamlRecord::Property {
            attribute_id: 0x10,
            value: format!("/SourceLib;component/Images/item{index}.png"),
        });
        records.push(BamlRecord::Raw {
            record_type: BamlRecordType::ElementEnd,
            data: Vec::new(),
        });
    }
    records.push(BamlRecord::Raw {
        record_type: BamlRecordType::DocumentEnd,
        data: Vec::new(),
    });

    BamlDocument {
        records,
        ..BamlDocument::default()
    }
}

/// Benchmark the BAML codec and a full container rewrite on a synthetic page
fn bench_baml(c: &mut Criterion) {
    let page = synthetic_page(2_000);
    let data = page.to_bytes().unwrap();

    let mut group = c.benchmark_group("baml");
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function("parse", |b| {
        b.iter(|| {
            let parsed = BamlDocument::parse(black_box(&data)).unwrap();
            black_box(parsed)
        });
    });
    group.bench_function("write", |b| {
        b.iter(|| black_box(black_box(&page).to_bytes().unwrap()));
    });
    group.finish();

    let container = ResourceSet {
        reader_type: "System.Resources.ResourceReader, mscorlib".to_string(),
        resource_set_type: "System.Resources.RuntimeResourceSet".to_string(),
        type_names: Vec::new(),
        entries: vec![ResourceEntry::stream("page.baml", &data)],
    }
    .to_bytes()
    .unwrap();
    let sources: BTreeSet<String> = ["SourceLib".to_string()].into_iter().collect();
    let remapper = MarkupRemapper {
        sources: &sources,
        module_assembly: Some("App"),
        target_name: "Merged",
        target_full_name: "Merged, Version=1.0.0.0, Culture=neutral, PublicKeyToken=null".to_string(),
    };

    let mut group = c.benchmark_group("markup");
    group.throughput(Throughput::Bytes(container.len() as u64));
    group.bench_function("remap_container", |b| {
        b.iter(|| black_box(remapper.remap_container(black_box(&container)).unwrap()));
    });
    group.finish();
}

criterion_group!(benches, bench_baml);
criterion_main!(benches);
