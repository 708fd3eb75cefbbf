//! Curated data behind name detection.

use std::collections::HashSet;

use once_cell::sync::Lazy;

/// Common given names and surnames (English, German, French, Spanish, Italian, Dutch,
/// Scandinavian, Russian), capitalized as they appear in running text.
const KNOWN_NAMES: &[&str] = &[
    // English given names
    "Adam", "Agatha", "Albert", "Alexander", "Alfred", "Alice", "Amelia", "Andrew", "Ann",
    "Anna", "Anne", "Anthony", "Archibald", "Arthur", "Barbara", "Beatrice", "Benjamin",
    "Bertha", "Catherine", "Charles", "Charlotte", "Christopher", "Clara", "Daniel", "David",
    "Dorothy", "Edgar", "Edith", "Edmund", "Edward", "Eleanor", "Elizabeth", "Ellen", "Emily",
    "Emma", "Ernest", "Esther", "Evelyn", "Florence", "Francis", "Frank", "Frederick",
    "George", "Georgiana", "Grace", "Hannah", "Harold", "Harriet", "Harry", "Helen", "Henry",
    "Herbert", "Hugh", "Irene", "Isaac", "Isabella", "Jack", "Jacob", "James", "Jane",
    "Jennifer", "Jessica", "Joan", "John", "Jonathan", "Joseph", "Julia", "Kate", "Katherine",
    "Laura", "Lawrence", "Leonard", "Lilian", "Louisa", "Lucy", "Lydia", "Margaret", "Maria",
    "Marianne", "Martha", "Mary", "Matthew", "Michael", "Molly", "Nancy", "Nathaniel",
    "Nicholas", "Oliver", "Patrick", "Paul", "Peter", "Philip", "Rachel", "Ralph", "Rebecca",
    "Richard", "Robert", "Roger", "Rose", "Samuel", "Sarah", "Sherlock", "Sophia", "Stephen",
    "Susan", "Thomas", "Timothy", "Victoria", "Walter", "William", "Mycroft", "Irene",
    "Fitzwilliam", "Jasper", "Silas", "Tobias", "Percy", "Reginald", "Cedric", "Wilfred",
    // English surnames
    "Adams", "Allen", "Baker", "Barker", "Bennet", "Bingley", "Brown", "Campbell", "Carter",
    "Clark", "Collins", "Cooper", "Darcy", "Davies", "Evans", "Fisher", "Gregson", "Green",
    "Hall", "Harris", "Holmes", "Hudson", "Hughes", "Jackson", "Jones", "King", "Lestrade",
    "Lewis", "Martin", "Miller", "Moriarty", "Morris", "Morstan", "Parker", "Roberts",
    "Robinson", "Scott", "Smith", "Stapleton", "Taylor", "Thompson", "Turner", "Walker",
    "Watson", "White", "Wickham", "Williams", "Wilson", "Wood", "Wright", "Young", "Baskerville",
    "Hopkins", "Lucas", "Mortimer",
    // German
    "Anton", "Bernhard", "Dieter", "Friedrich", "Fritz", "Gerhard", "Gretchen", "Hans",
    "Heinrich", "Helga", "Hermann", "Ingrid", "Johann", "Jürgen", "Karl", "Klaus", "Ludwig",
    "Otto", "Sabine", "Ursula", "Werner", "Wolfgang", "Becker", "Fischer", "Hoffmann",
    "Koch", "Meyer", "Müller", "Richter", "Schmidt", "Schneider", "Schulz", "Wagner", "Weber",
    // French
    "Adèle", "Amélie", "André", "Antoine", "Claude", "Étienne", "François", "Françoise",
    "Gaston", "Henri", "Jacques", "Jean", "Jeanne", "Julien", "Louis", "Lucien", "Marcel",
    "Marguerite", "Pierre", "René", "Sophie", "Valjean", "Javert", "Cosette", "Bernard",
    "Dubois", "Durand", "Fontaine", "Girard", "Lambert", "Laurent", "Lefebvre", "Leroy",
    "Moreau", "Petit", "Roux", "Thomas", "Dantès", "Mercédès",
    // Spanish
    "Alejandro", "Alonso", "Carlos", "Carmen", "Diego", "Dolores", "Fernando", "Francisco",
    "Isabel", "Javier", "José", "Juan", "Lucía", "Manuel", "Miguel", "Pablo", "Pedro",
    "Quixote", "Sancho", "Teresa", "Dulcinea", "Fernández", "García", "González",
    "Hernández", "López", "Martínez", "Pérez", "Rodríguez", "Sánchez", "Panza",
    // Italian
    "Alessandro", "Antonio", "Beatrice", "Francesca", "Giovanni", "Giulia", "Giuseppe",
    "Lorenzo", "Luca", "Marco", "Matteo", "Paolo", "Pietro", "Sofia", "Bianchi", "Colombo",
    "Esposito", "Ferrari", "Ricci", "Romano", "Rossi", "Russo",
    // Dutch
    "Anouk", "Bram", "Daan", "Femke", "Hendrik", "Jan", "Joost", "Pieter", "Sanne", "Willem",
    "Bakker", "Dekker", "Jansen", "Visser", "Vries",
    // Scandinavian
    "Astrid", "Bjørn", "Erik", "Freya", "Gustav", "Ingrid", "Lars", "Magnus", "Nils",
    "Olaf", "Sigrid", "Sven", "Andersen", "Hansen", "Johansson", "Larsen", "Nilsson",
    "Olsen", "Karlsson",
    // Russian (romanized)
    "Alexei", "Alyosha", "Anastasia", "Andrei", "Dmitri", "Fyodor", "Ivan", "Katerina",
    "Konstantin", "Lev", "Mikhail", "Natasha", "Nikolai", "Olga", "Pyotr", "Raskolnikov",
    "Rodion", "Sergei", "Sonya", "Tatiana", "Vladimir", "Yuri", "Karamazov", "Ivanov",
    "Petrov", "Pierre", "Bezukhov", "Rostov", "Volkonsky", "Karenina", "Vronsky",
];

/// Glyphs commonly used to phonetically render foreign names in Chinese.
const TRANSLITERATION_GLYPHS: &str = concat!(
    "阿巴贝布卡查达德迪多法菲弗盖格哈赫洪胡杰凯科克拉莱兰勒雷利里琳路卢",
    "马曼梅米莫默穆纳尼诺帕佩彼皮普奎瑞萨赛珊舍施斯索塔特蒂图瓦维沃西夏辛",
    "雅扬耶伊尤泽姆朗森伯罗瓜奥恩芬威丝尔亚安埃艾厄温叶基吉列日什茨捷宁夫",
    "洛林依戈齐兹希约谢波托奇舒库鲁苏旺加提拜顿登迈费芙肯连彭泰休寇崔修芭",
    "妮娅娜塞蕾黛沙丹瑟珀汀柯蒙乔迦若茜碧茉蓓佳柏桑亨福尔摩华玛丽琼瑰",
    "坦翰逊班甘坎坡垒培堡墨奈姬孚宾密岑岚庞廷弥恺慕扎",
    "敖斐昂昆朱杜松桂棱欧沁沛泊浦涅淮渥漫潘焦熙牧琦畅盎祖",
    "禄笛纪翡聪腓荻莉莎莲菈菩葛蔡裴褚覃赖逸郝鄂霍韦鲍黎",
    "生翁耐聂萧蒲裘詹贡郎铎锡雁颜魏鸿仑伍伦佐侬俄傅儒凡凤刚劳勃勋博",
    "卓卫厉史吕哥唐嗣士娃孔宋寅尧巍康彤律悉惠戴拂敏易曹汉汤浑海烈",
    "爵珠琪琴珂珈瑙瑶璐璃嘉露蕊薇蔻绮翠茵荷苔芮蓉纶缪罕门铁铭锐霖钟",
    "鑫韩凰珍玲瑛甄保冈古可台司因思敦昌明根歌津满炎照甫白石竹纯肖苗",
);

static KNOWN: Lazy<HashSet<&'static str>> = Lazy::new(|| KNOWN_NAMES.iter().copied().collect());
static GLYPHS: Lazy<HashSet<char>> = Lazy::new(|| TRANSLITERATION_GLYPHS.chars().collect());

pub fn is_known_name(word: &str) -> bool {
    KNOWN.contains(word)
}

pub fn is_transliteration_glyph(ch: char) -> bool {
    GLYPHS.contains(&ch)
}

/// Capitalized words that start sentences or titles and are never names on their own.
pub fn is_leading_stopword(word: &str) -> bool {
    matches!(
        word,
        "The" | "A" | "An" | "And" | "But" | "Or" | "If" | "When" | "Then" | "Now" | "So"
            | "In" | "On" | "At" | "Of" | "For" | "To" | "From" | "With" | "By" | "As"
            | "He" | "She" | "It" | "They" | "We" | "I" | "You" | "My" | "His" | "Her"
            | "Our" | "Their" | "This" | "That" | "Dear" | "Poor" | "Old" | "Young"
            | "Yes" | "No" | "Oh" | "Well" | "Chapter"
    )
}
